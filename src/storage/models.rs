pub mod task;

pub use task::{BacktestTask, TaskFilter, TaskInsert, TaskRow, TaskStatus, TerminalUpdate};
