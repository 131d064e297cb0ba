use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::task::TaskKind;

pub type JobId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Rutas de entrada en el DFS: archivos, directorios o patrones glob
    pub input_paths: Vec<String>,

    /// Id de la función map registrada, ej: "wordcount"
    pub mapper_id: String,

    /// Id de la función reduce registrada, ej: "sum"
    pub reducer_id: String,

    /// Número de particiones: tareas map y tareas reduce
    pub partition_count: u32,

    /// Directorio de salida en el DFS (no debe existir)
    pub output_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Mapping,
    Shuffling,
    Reducing,
    Succeeded,
    Failed,
}

impl JobStatus {
    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Mapping => 1,
            JobStatus::Shuffling => 2,
            JobStatus::Reducing => 3,
            JobStatus::Succeeded | JobStatus::Failed => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Sólo se avanza: nunca se vuelve a una fase anterior ni se sale de un estado final.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobStatus::Failed => true,
            JobStatus::Succeeded => *self == JobStatus::Reducing,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

/// Error que dejó un job en FAILED, con la tarea culpable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub task_id: Option<String>,
    pub kind: Option<TaskKind>,
    pub partition: Option<u32>,
    pub attempts: u32,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub status: JobStatus,

    pub input_paths: Vec<String>,
    pub mapper_id: String,
    pub reducer_id: String,
    pub partition_count: u32,
    pub output_path: String,

    /// -------- Métricas del job --------
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub failed_attempts: u32,
    pub retries: u32,
    pub input_records: u64,
    pub output_records: u64,

    pub error: Option<JobError>,
}

impl JobInfo {
    pub fn new(id: JobId, req: JobRequest) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            input_paths: req.input_paths,
            mapper_id: req.mapper_id,
            reducer_id: req.reducer_id,
            partition_count: req.partition_count,
            output_path: req.output_path,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            total_tasks: req.partition_count * 2,
            completed_tasks: 0,
            failed_attempts: 0,
            retries: 0,
            input_records: 0,
            output_records: 0,
            error: None,
        }
    }
}
