//! Vela Core
//!
//! Reusable lifecycle machinery for cloud resource controllers: a generic
//! status-polling loop, tag reconciliation, bounded retries for
//! eventually-consistent APIs, and the shared error type.

pub mod error;
pub mod retry;
pub mod tags;
pub mod timeouts;
pub mod waiter;
