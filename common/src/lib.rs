pub mod checksum;
pub mod config;
pub mod engine;
pub mod error;
pub mod fs;
pub mod job;
pub mod path;
pub mod results;
pub mod task;
pub mod wordcount;

pub use config::{ClusterConfig, DataNodeSpec, WriteQuorum};
pub use error::{DfsError, DfsResult, DfsWarning};
pub use fs::{
    BlockId, BlockRef, FileKind, FileStatus, FsckReport, NodeId, NodeReport, ReplicaLocation,
    WriteSummary, DEFAULT_DIR_PERMISSION, DEFAULT_FILE_PERMISSION,
};
pub use job::{JobError, JobId, JobInfo, JobRequest, JobStatus};
pub use results::JobResults;
pub use task::{Task, TaskId, TaskKind, TaskStatus};
