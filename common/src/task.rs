use serde::{Deserialize, Serialize};

use crate::job::JobId;

pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    Map,
    Reduce,
}

impl TaskKind {
    pub fn letter(&self) -> char {
        match self {
            TaskKind::Map => 'm',
            TaskKind::Reduce => 'r',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Scheduled,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub kind: TaskKind,
    pub partition: u32,
    pub status: TaskStatus,
    /// Intentos ya lanzados (0 = todavía no corrió)
    pub attempt: u32,
    pub last_error: Option<String>,
}

impl Task {
    pub fn new(job_id: &str, kind: TaskKind, partition: u32) -> Self {
        Self {
            id: format!("{}-{}-{:05}", job_id, kind.letter(), partition),
            job_id: job_id.to_string(),
            kind,
            partition,
            status: TaskStatus::Scheduled,
            attempt: 0,
            last_error: None,
        }
    }
}
