use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResults {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Directorio del DFS donde quedaron los outputs de este job
    pub output_path: String,
    /// Rutas completas de los archivos part-r-NNNNN
    pub files: Vec<String>,
}
