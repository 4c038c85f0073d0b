pub mod engine;
pub mod store;

pub use engine::{NewTask, TaskEngine, TaskPatch};
pub use store::{
    SortDirection, SortField, TaskListParams, TaskPriority, TaskStatus, TaskStore, TaskView,
};
