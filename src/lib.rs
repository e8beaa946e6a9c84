pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod passcode;
pub mod policy;
pub mod reaper;
pub mod wal;
pub mod wire;
