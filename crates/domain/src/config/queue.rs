use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "d_worker_count")]
    pub worker_count: u32,
    #[serde(default = "d_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "d_task_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "d_shutdown_drain_secs")]
    pub shutdown_drain_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: d_worker_count(),
            poll_interval_secs: d_poll_interval_secs(),
            task_timeout_secs: d_task_timeout_secs(),
            max_attempts: d_max_attempts(),
            shutdown_drain_secs: d_shutdown_drain_secs(),
        }
    }
}

fn d_worker_count() -> u32 {
    4
}
fn d_poll_interval_secs() -> u64 {
    2
}
fn d_task_timeout_secs() -> u64 {
    120
}
fn d_max_attempts() -> u32 {
    3
}
fn d_shutdown_drain_secs() -> u64 {
    30
}
