pub mod database;
pub mod migrations;
pub mod models;
pub mod repository;

pub use database::init_pool;
pub use migrations::{embedded_migrations, run_migrations, MIGRATOR};
pub use models::{BacktestTask, TaskFilter, TaskInsert, TaskStatus, TerminalUpdate};
pub use repository::{DbExecutor, InMemoryTaskRepository, Page, PgTaskRepository, TaskRepository};
