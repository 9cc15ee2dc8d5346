//! Scheduler unit tests


use crate::runtime::scheduler::{PoolConfig, TaskState};

#[cfg(test)]
mod task_state_tests {
    use super::*;

    #[test]
    fn test_task_state_u8_roundtrip() {
        for state in [
            TaskState::Pending,
            TaskState::Running,
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Cancelled,
        ] {
            assert_eq!(TaskState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_task_state_monotonic() {
        assert!(TaskState::Pending.can_transition_to(TaskState::Running));
        assert!(TaskState::Pending.can_transition_to(TaskState::Cancelled));
        assert!(TaskState::Running.can_transition_to(TaskState::Completed));
        assert!(TaskState::Running.can_transition_to(TaskState::Failed));
        assert!(!TaskState::Running.can_transition_to(TaskState::Cancelled));
        assert!(!TaskState::Running.can_transition_to(TaskState::Pending));
        assert!(!TaskState::Completed.can_transition_to(TaskState::Failed));
        assert!(!TaskState::Cancelled.can_transition_to(TaskState::Running));
    }

    #[test]
    fn test_task_state_terminal() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }
}

#[cfg(test)]
mod task_priority_tests {
    use crate::runtime::scheduler::TaskPriority;

    #[test]
    fn test_task_priority_ord() {
        assert!(TaskPriority::Low < TaskPriority::Medium);
        assert!(TaskPriority::Medium < TaskPriority::High);
    }

    #[test]
    fn test_task_priority_default() {
        assert_eq!(TaskPriority::default(), TaskPriority::Medium);
    }

    #[test]
    fn test_task_priority_display() {
        assert_eq!(TaskPriority::High.to_string(), "high");
        assert_eq!(TaskPriority::Low.to_string(), "low");
    }
}

#[cfg(test)]
mod pool_config_tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert!(config.pool_size >= 1);
        assert_eq!(config.max_sync_duration(), Duration::from_secs(180));
        assert_eq!(config.thread_name_prefix, "taskpool");
        assert!(config.stack_size.is_none());
    }

    #[test]
    fn test_pool_config_with_size() {
        let config = PoolConfig::with_size(3);
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.max_sync_ms, PoolConfig::default().max_sync_ms);
    }

    #[test]
    fn test_watchdog_interval_floor() {
        let config = PoolConfig {
            watchdog_interval_ms: 0,
            ..PoolConfig::default()
        };
        assert_eq!(config.watchdog_interval(), Duration::from_millis(1));
    }
}
