use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Lifecycle timestamps shared by every work unit. Timestamps are only ever
/// set, never cleared: `started_at` at most once, and once `completed_at`
/// or `failed_at` is written the unit is terminal and further transitions
/// are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lifecycle {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn complete(&mut self) {
        if !self.terminal() {
            self.completed_at = Some(Utc::now());
        }
    }

    pub fn fail(&mut self) {
        if !self.terminal() {
            self.failed_at = Some(Utc::now());
        }
    }

    pub fn terminal(&self) -> bool {
        self.completed_at.is_some() || self.failed_at.is_some()
    }

    pub fn status(&self) -> Status {
        if self.completed_at.is_some() {
            Status::Completed
        } else if self.failed_at.is_some() {
            Status::Failed
        } else if self.started_at.is_some() {
            Status::InProgress
        } else {
            Status::Pending
        }
    }
}
