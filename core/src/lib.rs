//! # Meshstream Core
//!
//! Core crate for meshstream concurrency utilities.

pub mod work_queue;

pub use work_queue::{WorkItem, WorkQueue, WorkerThread};

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
