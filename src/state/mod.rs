//! State module for tracking task progress
//!
//! Every task carries a `TaskState` that the pipeline advances as the task
//! moves through dedup, admission, the pre-request hook, the fetch and the
//! retry/terminal logic.

mod task_state;

pub use task_state::TaskState;
