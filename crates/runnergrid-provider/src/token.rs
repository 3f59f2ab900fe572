//! Registration tokens.
//!
//! A registration token is a single-use, time-boxed secret binding one
//! worker process to the CI provider. It is never persisted, never logged
//! (`Debug` redacts it), and consumed by the one `register` call that
//! uses it.

/// A short-lived secret for registering a single runner.
///
/// Deliberately not `Clone` or `Serialize`: the token exists between the
/// fetch that produced it and the registration call that consumes it.
pub struct RegistrationToken {
    secret: String,
    expires_at: u64,
}

impl RegistrationToken {
    pub fn new(secret: String, expires_at: u64) -> Self {
        Self { secret, expires_at }
    }

    /// Unix timestamp after which the provider will reject the token.
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Whether the token has expired at the given time.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Consume the token, yielding the secret for the registration call.
    pub fn reveal(self) -> String {
        self.secret
    }
}

impl std::fmt::Debug for RegistrationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationToken")
            .field("secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_shows_secret() {
        let token = RegistrationToken::new("AAAH-very-secret".to_string(), 2000);
        let printed = format!("{token:?}");
        assert!(!printed.contains("very-secret"));
        assert!(printed.contains("[REDACTED]"));
    }

    #[test]
    fn expiry_boundary() {
        let token = RegistrationToken::new("s".to_string(), 2000);
        assert!(!token.is_expired(1999));
        assert!(token.is_expired(2000));
        assert!(token.is_expired(2001));
    }

    #[test]
    fn reveal_consumes() {
        let token = RegistrationToken::new("s3cret".to_string(), 2000);
        assert_eq!(token.reveal(), "s3cret");
    }
}
