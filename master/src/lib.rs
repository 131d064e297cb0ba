//! Nodo maestro de minidfs: namespace, ubicación de réplicas, fachada del
//! sistema de archivos, coordinador de jobs y API HTTP.

pub mod access;
pub mod cluster;
pub mod coordinator;
pub mod dfs;
pub mod handlers;
pub mod journal;
pub mod monitor;
pub mod namespace;
pub mod placement;
pub mod state;

pub use access::{Access, AccessPolicy, AllowAll, PosixPolicy};
pub use cluster::Cluster;
pub use coordinator::{JobCoordinator, TaskTable};
pub use dfs::{BlockLocation, DfsClient, DfsReader, DfsWriter, FileIter};
pub use journal::{EditOp, FileJournal, Journal, NullJournal};
pub use namespace::NameTree;
pub use placement::{Placement, PlacementPolicy};
pub use state::AppState;
