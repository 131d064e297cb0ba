//! Lado "worker" del clúster: almacenamiento de bloques y ejecución de tareas.

pub mod block_store;
pub mod datanode;
pub mod executor;

pub use block_store::BlockStore;
pub use datanode::DataNode;
pub use executor::{cancel_token, CancelToken, FunctionRegistry, TaskError};
