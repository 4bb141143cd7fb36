pub mod model;
pub mod repository;

pub use model::{Plan, Step, Task};
pub use repository::PlanRepository;
