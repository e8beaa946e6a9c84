use ulid::Ulid;

pub const DEFAULT_PASS_CODE_PREFIX: &str = "UM-EVENT";

/// Produces the access pass code printed on an approved booking's QR pass.
///
/// Must be deterministic per booking so a pass can be re-rendered without
/// invalidating the one already handed out.
pub trait PassCodeIssuer: Send + Sync {
    fn issue(&self, booking_id: Ulid) -> String;
}

/// `"{prefix}-{booking ulid}"`.
#[derive(Debug, Clone)]
pub struct PrefixedPassCodes {
    prefix: String,
}

impl PrefixedPassCodes {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Default for PrefixedPassCodes {
    fn default() -> Self {
        Self::new(DEFAULT_PASS_CODE_PREFIX)
    }
}

impl PassCodeIssuer for PrefixedPassCodes {
    fn issue(&self, booking_id: Ulid) -> String {
        format!("{}-{booking_id}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_and_prefixed() {
        let issuer = PrefixedPassCodes::default();
        let id = Ulid::new();
        let code = issuer.issue(id);
        assert_eq!(code, format!("UM-EVENT-{id}"));
        assert_eq!(issuer.issue(id), code);
        assert_ne!(issuer.issue(Ulid::new()), code);
    }

    #[test]
    fn custom_prefix() {
        let id = Ulid::nil();
        assert_eq!(
            PrefixedPassCodes::new("GYM").issue(id),
            "GYM-00000000000000000000000000"
        );
    }
}
