// 佇列中的工作描述
pub mod jobs;

pub use jobs::{BacktestJob, IngestionJob, JobDescriptor, TriggerSource};
