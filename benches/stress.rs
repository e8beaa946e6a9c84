use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

const HOUR: i64 = 3_600_000; // 1 hour in ms
// Two days out on an hour boundary, clear of the default notice window.
static EPOCH: LazyLock<i64> = LazyLock::new(|| {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before 1970")
        .as_millis() as i64;
    (now / HOUR + 48) * HOUR
});

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Client {
    async fn connect(host: &str, port: u16) -> Self {
        let stream = TcpStream::connect((host, port)).await.expect("connect failed");
        Client { framed: Framed::new(stream, LinesCodec::new()) }
    }

    async fn call(&mut self, request: Value) -> Value {
        self.framed.send(request.to_string()).await.expect("send failed");
        loop {
            let line = self
                .framed
                .next()
                .await
                .expect("connection closed")
                .expect("read failed");
            let v: Value = serde_json::from_str(&line).expect("bad response");
            if v.get("effect").is_none() {
                return v;
            }
        }
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn range(start_hour: i64, hours: i64) -> Value {
    json!({ "start": *EPOCH + start_hour * HOUR, "end": *EPOCH + (start_hour + hours) * HOUR })
}

async fn add_venue(client: &mut Client, name: &str) -> String {
    let id = Ulid::new().to_string();
    let r = client
        .call(json!({
            "op": "upsertVenue",
            "venue": { "id": id, "name": name, "capacity": 500, "isActive": true }
        }))
        .await;
    assert_eq!(r["ok"], true, "upsertVenue failed: {r}");
    id
}

async fn add_equipment(client: &mut Client, name: &str, quantity: u32) -> String {
    let id = Ulid::new().to_string();
    let r = client
        .call(json!({
            "op": "upsertEquipment",
            "equipment": { "id": id, "name": name, "quantity": quantity, "category": "bench", "venueId": null }
        }))
        .await;
    assert_eq!(r["ok"], true, "upsertEquipment failed: {r}");
    id
}

fn submit(venue: &str, r: Value, equipment: &[(&str, u32)]) -> Value {
    let lines: Vec<Value> = equipment
        .iter()
        .map(|(id, q)| json!({ "equipmentId": id, "quantity": q }))
        .collect();
    json!({
        "op": "submit",
        "organizerId": Ulid::new().to_string(),
        "venueId": venue,
        "range": r,
        "expectedAttendees": 50,
        "equipment": lines
    })
}

async fn phase1_sequential(host: &str, port: u16) {
    let mut client = Client::connect(host, port).await;
    let venue = add_venue(&mut client, &format!("bench-seq-{}", Ulid::new())).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        let r = client.call(submit(&venue, range(i as i64, 1), &[])).await;
        latencies.push(t.elapsed());
        assert_eq!(r["ok"], true, "submit failed: {r}");
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} submissions in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("submit latency", &mut latencies);
}

/// Many venues drawing on one small pool of equipment: every request needs
/// the shared lock, and most lose.
async fn phase2_contended_pool(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200;

    let mut setup = Client::connect(host, port).await;
    let pool = add_equipment(&mut setup, &format!("bench-pool-{}", Ulid::new()), 20).await;
    let mut venues = Vec::new();
    for i in 0..n_tasks {
        venues.push(add_venue(&mut setup, &format!("bench-pool-room-{i}-{}", Ulid::new())).await);
    }
    drop(setup);

    let accepted = Arc::new(AtomicUsize::new(0));
    let conflicted = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for venue in venues {
        let host = host.to_string();
        let pool = pool.clone();
        let accepted = accepted.clone();
        let conflicted = conflicted.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            for j in 0..n_per_task {
                // Overlapping 2h windows, 3 units each: at most 6 holders per hour.
                let r = client.call(submit(&venue, range(j as i64 % 48, 2), &[(&pool, 3)])).await;
                if r["ok"] == true {
                    accepted.fetch_add(1, Ordering::Relaxed);
                    let id = r["bookingId"].clone();
                    client.call(json!({ "op": "approve", "bookingId": id })).await;
                } else {
                    conflicted.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    for h in handles {
        h.await.expect("task panicked");
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} submissions = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    println!(
        "  accepted={}, conflicted={}",
        accepted.load(Ordering::Relaxed),
        conflicted.load(Ordering::Relaxed)
    );
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let mut setup = Client::connect(host, port).await;
    let venue = add_venue(&mut setup, &format!("bench-read-{}", Ulid::new())).await;
    let pool = add_equipment(&mut setup, &format!("bench-read-pool-{}", Ulid::new()), 10).await;
    for i in 0..200 {
        setup.call(submit(&venue, range(i * 2, 1), &[(&pool, 2)])).await;
    }
    drop(setup);

    // Writers keep submitting into their own venues in the background.
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            let venue = add_venue(&mut client, &format!("bench-writer-{w}-{}", Ulid::new())).await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                client.call(submit(&venue, range(i, 1), &[])).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        let venue = venue.clone();
        let pool = pool.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader * 2);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .call(json!({ "op": "venueAvailability", "venueId": venue, "range": range(0, 400) }))
                    .await;
                latencies.push(t.elapsed());
                let t = Instant::now();
                client
                    .call(json!({ "op": "equipmentAvailability", "equipmentIds": [pool], "range": range(0, 400) }))
                    .await;
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.expect("reader panicked"));
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for c in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            let venue = add_venue(&mut client, &format!("bench-storm-{c}-{}", Ulid::new())).await;
            for i in 0..ops_per_conn {
                let r = client.call(submit(&venue, range(i, 1), &[])).await;
                assert_eq!(r["ok"], true, "submit failed: {r}");
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("VENUEBOOK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("VENUEBOOK_PORT")
        .unwrap_or_else(|_| "7480".into())
        .parse()
        .expect("invalid VENUEBOOK_PORT");

    println!("=== venuebook stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase works on its own freshly created venues and equipment.

    println!("[phase 1] sequential submit throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended equipment pool");
    phase2_contended_pool(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
