//! FieldLine Sync Engine
//!
//! This module drains the persistent operation queue, including:
//! - Priority-first, FIFO-within-priority dispatch order
//! - Bounded concurrent batches with a single-flight guarantee
//! - Exponential backoff gating retries of failed items
//! - Trigger plumbing: debounced kicks, periodic timer, reconnect edges

pub mod dispatcher;
pub mod queue;
pub mod retry;
pub mod scheduler;

// Re-export main types
pub use dispatcher::{Dispatcher, DispatcherConfig, SyncOutcome, SyncReport, SyncStatusEvent};
pub use queue::{QueueStatus, SyncQueue};
pub use retry::RetryPolicy;
pub use scheduler::{SchedulerConfig, SchedulerHandle, SyncScheduler};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        // Verify all main types are accessible
        let _dispatcher_config = DispatcherConfig::default();
        let _scheduler_config = SchedulerConfig::default();
        let _policy = RetryPolicy::default();
    }
}
