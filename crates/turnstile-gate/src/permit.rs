//! One-shot release tokens for admitted connections.

use crate::gate::GateInner;
use crate::SlotState;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Proof that a connection was admitted by an [`AdmissionGate`](crate::AdmissionGate).
///
/// Each permit owns exactly one slot of its gate's counter. The slot is
/// returned by the first call to [`release`](Self::release) or, failing
/// that, when the permit is dropped. Further releases are no-ops, so a
/// transport that reports "closed" more than once cannot free capacity twice.
#[must_use = "dropping the permit immediately releases the connection slot"]
pub struct ConnectionPermit {
    gate: Arc<GateInner>,
    released: AtomicBool,
}

impl ConnectionPermit {
    pub(crate) fn new(gate: Arc<GateInner>) -> Self {
        Self {
            gate,
            released: AtomicBool::new(false),
        }
    }

    /// Return the slot to the gate.
    ///
    /// Returns `true` if this call released the slot, `false` if it had
    /// already been released.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.gate.release();
        true
    }

    /// Whether the slot has been returned.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// `Admitted` until released, `Closed` afterwards.
    pub fn state(&self) -> SlotState {
        if self.is_released() {
            SlotState::Closed
        } else {
            SlotState::Admitted
        }
    }

    /// Label of the gate that issued this permit.
    pub fn label(&self) -> &str {
        self.gate.label()
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ConnectionPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPermit")
            .field("gate", &self.gate.label())
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{AdmissionGate, SlotState};

    #[test]
    fn test_release_is_idempotent() {
        let gate = AdmissionGate::new(2).unwrap();
        let permit = gate.try_admit().unwrap();
        assert_eq!(gate.num_connections(), 1);
        assert_eq!(permit.state(), SlotState::Admitted);

        assert!(permit.release());
        assert_eq!(gate.num_connections(), 0);
        assert_eq!(permit.state(), SlotState::Closed);

        assert!(!permit.release());
        assert_eq!(gate.num_connections(), 0);

        drop(permit);
        assert_eq!(gate.num_connections(), 0);
    }

    #[test]
    fn test_drop_releases() {
        let gate = AdmissionGate::new(1).unwrap();
        let permit = gate.try_admit().unwrap();
        assert!(gate.try_admit().is_none());

        drop(permit);
        assert_eq!(gate.num_connections(), 0);
        assert!(gate.try_admit().is_some());
    }

    #[test]
    fn test_release_from_other_thread() {
        let gate = AdmissionGate::new(1).unwrap();
        let permit = gate.try_admit().unwrap();

        std::thread::spawn(move || drop(permit)).join().unwrap();
        assert_eq!(gate.num_connections(), 0);
    }

    #[test]
    fn test_permit_outlives_gate_handle() {
        let gate = AdmissionGate::builder(1).label("short-lived").build().unwrap();
        let observer = gate.clone();
        let permit = gate.try_admit().unwrap();
        drop(gate);

        assert_eq!(permit.label(), "short-lived");
        assert_eq!(observer.num_connections(), 1);
        drop(permit);
        assert_eq!(observer.num_connections(), 0);
    }
}
