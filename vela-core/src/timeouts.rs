//! Per-operation timeout configuration
//!
//! Timeouts are plain values handed to each controller at construction;
//! there is no ambient configuration store. Defaults live with the
//! controllers, since sensible ceilings differ per resource kind.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTimeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl OperationTimeouts {
    pub const fn new(create: Duration, update: Duration, delete: Duration) -> Self {
        Self {
            create,
            update,
            delete,
        }
    }

    /// The same ceiling for every operation kind.
    pub const fn uniform(timeout: Duration) -> Self {
        Self::new(timeout, timeout, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_sets_all_operations() {
        let timeouts = OperationTimeouts::uniform(Duration::from_secs(120));
        assert_eq!(timeouts.create, Duration::from_secs(120));
        assert_eq!(timeouts.update, Duration::from_secs(120));
        assert_eq!(timeouts.delete, Duration::from_secs(120));
    }
}
