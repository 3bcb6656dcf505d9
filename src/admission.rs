//! Session admission: credential extraction, token check, and the
//! concurrent-session cap.
//!
//! Grounded in `sessions::mod::SessionManager::create_session_inner`, whose
//! doc comment explains why the check-and-insert must happen under a single
//! write-lock acquisition to avoid a TOCTOU race between two simultaneous
//! callers both observing `count < max` and both proceeding. The same shape
//! is used here, but as a plain atomic compare-and-increment rather than a
//! lock held across session construction, since admission only needs to
//! reserve a slot — constructing the `SessionSupervisor` itself can happen
//! outside the critical section.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::auth::TokenRegistry;

/// Why an upgrade attempt was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// No credential present, or present in an unrecognized format.
    MissingCredential,
    /// Credential present but not found in the [`TokenRegistry`].
    InvalidCredential,
    /// `count >= MAX_SESSIONS` at the moment of the attempt.
    AtCapacity,
}

/// A reserved control-session slot. Dropping it without calling
/// [`SessionSlot::release`] still releases the slot (via `Drop`), so a panic
/// partway through session setup can't leak capacity.
pub struct SessionSlot {
    count: Arc<AtomicUsize>,
    released: bool,
}

impl SessionSlot {
    /// Release the slot early. Idempotent with the implicit release on drop.
    pub fn release(mut self) {
        self.released = true;
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        if !self.released {
            self.count.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Enforces `MAX_SESSIONS` and fronts the [`TokenRegistry`] check for
/// control-session upgrades. Passive metrics subscribers bypass capacity
/// entirely — callers simply never call [`AdmissionController::admit`] for
/// that upgrade path.
#[derive(Clone)]
pub struct AdmissionController {
    tokens: TokenRegistry,
    count: Arc<AtomicUsize>,
    max_sessions: usize,
}

impl AdmissionController {
    pub fn new(tokens: TokenRegistry, max_sessions: usize) -> Self {
        Self {
            tokens,
            count: Arc::new(AtomicUsize::new(0)),
            max_sessions,
        }
    }

    /// Validate `credential` and reserve a control-session slot.
    ///
    /// Capacity is enforced via an atomic compare-and-increment loop:
    /// simultaneous callers racing for the last slot observe a consistent
    /// view of `count`, and at most one succeeds when only one slot remains.
    pub fn admit(&self, credential: Option<&str>) -> Result<SessionSlot, AdmissionError> {
        let credential = credential.ok_or(AdmissionError::MissingCredential)?;
        if !self.tokens.contains(credential) {
            return Err(AdmissionError::InvalidCredential);
        }

        loop {
            let current = self.count.load(Ordering::Acquire);
            if current >= self.max_sessions {
                return Err(AdmissionError::AtCapacity);
            }
            if self
                .count
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(SessionSlot {
                    count: Arc::clone(&self.count),
                    released: false,
                });
            }
        }
    }

    /// Validate a passive-metrics credential without touching the capacity
    /// counter.
    pub fn check_credential(&self, credential: Option<&str>) -> Result<(), AdmissionError> {
        let credential = credential.ok_or(AdmissionError::MissingCredential)?;
        if self.tokens.contains(credential) {
            Ok(())
        } else {
            Err(AdmissionError::InvalidCredential)
        }
    }

    /// Current number of admitted control sessions, for diagnostics.
    pub fn active_count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(max: usize) -> AdmissionController {
        AdmissionController::new(TokenRegistry::new(vec!["good".to_string()]), max)
    }

    #[test]
    fn rejects_missing_credential() {
        let c = controller(10);
        assert_eq!(c.admit(None), Err(AdmissionError::MissingCredential));
    }

    #[test]
    fn rejects_invalid_credential() {
        let c = controller(10);
        assert_eq!(
            c.admit(Some("bad")),
            Err(AdmissionError::InvalidCredential)
        );
    }

    #[test]
    fn admits_up_to_cap_then_rejects() {
        let c = controller(2);
        let s1 = c.admit(Some("good")).unwrap();
        let s2 = c.admit(Some("good")).unwrap();
        assert_eq!(c.admit(Some("good")), Err(AdmissionError::AtCapacity));
        assert_eq!(c.active_count(), 2);
        drop(s1);
        assert_eq!(c.active_count(), 1);
        s2.release();
        assert_eq!(c.active_count(), 0);
    }

    #[test]
    fn released_slot_frees_capacity_for_a_new_admission() {
        let c = controller(1);
        let s1 = c.admit(Some("good")).unwrap();
        assert_eq!(c.admit(Some("good")), Err(AdmissionError::AtCapacity));
        drop(s1);
        assert!(c.admit(Some("good")).is_ok());
    }
}
