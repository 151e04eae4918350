// 任务队列模块

pub mod task;
pub mod task_queue;

pub use task::{Task, TaskStatus};
pub use task_queue::{QueueStats, TaskContext, TaskEvent, TaskQueue};
