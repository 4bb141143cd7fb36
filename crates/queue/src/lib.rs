pub mod model;
pub mod repository;
pub mod worker;

pub use model::{QueueEntry, QueueStatus};
pub use repository::QueueRepository;
pub use worker::{run_reaper, shutdown, spawn_worker_pool, TaskRunner, WorkerPoolConfig};
