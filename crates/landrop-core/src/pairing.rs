//! Pairing code issuance and validation.
//!
//! Inbound transfers are gated by a short-lived 6-digit code. The receiver
//! issues a code for its own device identifier, the sender presents it on
//! the upload request, and the code is consumed after one successful
//! transfer. A code that is expired or already consumed is
//! indistinguishable from one that was never issued.
//!
//! The code is a human-readable shared secret for a trusted LAN, not a
//! cryptographic credential; replay within the validity window is an
//! accepted risk of this threat model.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;

/// Source of monotonic time, injected so expiry can be tested
/// deterministically.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// Clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug)]
struct StoredCode {
    code: String,
    expires_at: Instant,
}

/// Issues and validates single-use, time-limited pairing codes.
///
/// Exactly one live code exists per device identifier; issuing a new code
/// overwrites the previous one. Expiry is checked on read, so no timer is
/// required for correctness.
pub struct PairingAuthority {
    codes: Mutex<HashMap<String, StoredCode>>,
    ttl: Duration,
    clock: Box<dyn Clock>,
}

impl std::fmt::Debug for PairingAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingAuthority")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl PairingAuthority {
    /// Create an authority with the default 5-minute validity window.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(
            Duration::from_secs(crate::PAIRING_CODE_TTL_SECS),
            Box::new(SystemClock),
        )
    }

    /// Create an authority with an explicit validity window and clock.
    #[must_use]
    pub fn with_clock(ttl: Duration, clock: Box<dyn Clock>) -> Self {
        Self {
            codes: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// The configured validity window.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh 6-digit code for `device_id`, overwriting any
    /// existing code for that identifier.
    pub fn issue(&self, device_id: &str) -> String {
        let code = rand::thread_rng().gen_range(100_000..=999_999u32).to_string();
        let expires_at = self.clock.now() + self.ttl;

        self.codes.lock().expect("pairing map poisoned").insert(
            device_id.to_string(),
            StoredCode {
                code: code.clone(),
                expires_at,
            },
        );

        tracing::info!(device_id, "Issued pairing code");
        code
    }

    /// Check `code` against the live code for `device_id`.
    ///
    /// Returns `false` when no code exists, the code does not match, or the
    /// stored code has expired. An expired entry is removed as a side
    /// effect, so a stale code never remains validatable.
    pub fn validate(&self, device_id: &str, code: &str) -> bool {
        let mut codes = self.codes.lock().expect("pairing map poisoned");

        let Some(stored) = codes.get(device_id) else {
            return false;
        };

        if self.clock.now() >= stored.expires_at {
            codes.remove(device_id);
            tracing::debug!(device_id, "Pairing code expired on read");
            return false;
        }

        stored.code == code
    }

    /// Remove the code for `device_id` after a successful transfer, so it
    /// cannot be replayed by another connection.
    pub fn consume(&self, device_id: &str) {
        if self
            .codes
            .lock()
            .expect("pairing map poisoned")
            .remove(device_id)
            .is_some()
        {
            tracing::debug!(device_id, "Pairing code consumed");
        }
    }

    /// Drop all expired entries. Housekeeping only; [`validate`] already
    /// rejects expired codes on the fast path.
    ///
    /// [`validate`]: Self::validate
    pub fn sweep_expired(&self) {
        let now = self.clock.now();
        self.codes
            .lock()
            .expect("pairing map poisoned")
            .retain(|_, stored| stored.expires_at > now);
    }
}

impl Default for PairingAuthority {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Clock whose offset from a fixed base can be advanced by tests.
    #[derive(Clone)]
    struct ManualClock {
        base: Instant,
        offset: Arc<Mutex<Duration>>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Arc::new(Mutex::new(Duration::ZERO)),
            }
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }
    }

    fn authority_with_manual_clock() -> (PairingAuthority, ManualClock) {
        let clock = ManualClock::new();
        let authority =
            PairingAuthority::with_clock(Duration::from_secs(300), Box::new(clock.clone()));
        (authority, clock)
    }

    #[test]
    fn test_issue_returns_six_digits() {
        let authority = PairingAuthority::new();
        for _ in 0..50 {
            let code = authority.issue("d1");
            assert_eq!(code.len(), 6);
            let value: u32 = code.parse().expect("numeric code");
            assert!((100_000..=999_999).contains(&value), "no leading zeros: {code}");
        }
    }

    #[test]
    fn test_validate_correct_code() {
        let authority = PairingAuthority::new();
        let code = authority.issue("d1");
        assert!(authority.validate("d1", &code));
    }

    #[test]
    fn test_validate_wrong_code() {
        let authority = PairingAuthority::new();
        let code = authority.issue("d1");
        let wrong = if code == "000000" { "000001" } else { "000000" };
        assert!(!authority.validate("d1", wrong));
        // The real code is still live after a failed attempt.
        assert!(authority.validate("d1", &code));
    }

    #[test]
    fn test_validate_unknown_device() {
        let authority = PairingAuthority::new();
        assert!(!authority.validate("nobody", "123456"));
    }

    #[test]
    fn test_code_valid_strictly_before_expiry() {
        let (authority, clock) = authority_with_manual_clock();
        let code = authority.issue("d1");

        clock.advance(Duration::from_secs(299));
        assert!(authority.validate("d1", &code));
    }

    #[test]
    fn test_code_invalid_at_expiry() {
        let (authority, clock) = authority_with_manual_clock();
        let code = authority.issue("d1");

        clock.advance(Duration::from_secs(300));
        assert!(!authority.validate("d1", &code));
    }

    #[test]
    fn test_code_expires_after_six_minutes() {
        // Scenario: issue a code, wait six minutes, validation fails.
        let (authority, clock) = authority_with_manual_clock();
        let code = authority.issue("d1");

        clock.advance(Duration::from_secs(360));
        assert!(!authority.validate("d1", &code));
    }

    #[test]
    fn test_expired_entry_removed_on_read() {
        let (authority, clock) = authority_with_manual_clock();
        let code = authority.issue("d1");

        clock.advance(Duration::from_secs(301));
        assert!(!authority.validate("d1", &code));
        // Entry is gone, so even a clock rollback cannot revive it.
        assert!(authority.codes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reissue_invalidates_previous_code() {
        let (authority, _clock) = authority_with_manual_clock();
        let first = authority.issue("d1");
        let second = authority.issue("d1");

        if first != second {
            assert!(!authority.validate("d1", &first));
        }
        assert!(authority.validate("d1", &second));
    }

    #[test]
    fn test_consume_prevents_reuse() {
        let authority = PairingAuthority::new();
        let code = authority.issue("d1");
        assert!(authority.validate("d1", &code));

        authority.consume("d1");
        assert!(!authority.validate("d1", &code));
    }

    #[test]
    fn test_codes_are_per_device() {
        let authority = PairingAuthority::new();
        let code = authority.issue("d1");
        assert!(!authority.validate("d2", &code));
    }

    #[test]
    fn test_sweep_expired() {
        let (authority, clock) = authority_with_manual_clock();
        authority.issue("d1");
        authority.issue("d2");

        clock.advance(Duration::from_secs(301));
        authority.sweep_expired();
        assert!(authority.codes.lock().unwrap().is_empty());
    }
}
