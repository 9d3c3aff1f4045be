use serde::Serialize;

/// 單一工作的執行結果
///
/// 重複投遞時已完成的工作回傳 `AlreadyDone`，不視為錯誤。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Success { paths: Vec<String> },
    AlreadyDone { paths: Vec<String> },
    Failure { reason: String },
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Success { .. } => "success",
            JobOutcome::AlreadyDone { .. } => "already_done",
            JobOutcome::Failure { .. } => "failure",
        }
    }

    pub fn paths(&self) -> &[String] {
        match self {
            JobOutcome::Success { paths } | JobOutcome::AlreadyDone { paths } => paths,
            JobOutcome::Failure { .. } => &[],
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobOutcome::Failure { .. })
    }
}
