use std::{collections::BTreeMap, sync::Arc};

use common::{BlockId, ClusterConfig, DataNodeSpec, DfsError, DfsResult, NodeReport};
use tracing::info;
use worker::DataNode;

/// Registro de los datanodes del clúster (en proceso).
#[derive(Debug, Clone, Default)]
pub struct Cluster {
    nodes: BTreeMap<String, Arc<DataNode>>,
}

impl Cluster {
    /// Abre un datanode por cada entrada de la configuración, cada uno en
    /// `<data_dir>/nodes/<id>`.
    pub fn open(config: &ClusterConfig) -> DfsResult<Self> {
        let mut cluster = Self::default();
        for spec in &config.datanodes {
            cluster.add(spec, config)?;
        }
        info!("clúster con {} datanodes", cluster.nodes.len());
        Ok(cluster)
    }

    fn add(&mut self, spec: &DataNodeSpec, config: &ClusterConfig) -> DfsResult<()> {
        if self.nodes.contains_key(&spec.id) {
            return Err(DfsError::AlreadyExists(format!("datanode {}", spec.id)));
        }
        let node = DataNode::open(spec, config.node_dir(&spec.id))?;
        self.nodes.insert(spec.id.clone(), Arc::new(node));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<DataNode>> {
        self.nodes.get(id).cloned()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<DataNode>> {
        self.nodes.values()
    }

    pub fn reports(&self) -> Vec<NodeReport> {
        self.nodes.values().map(|n| n.report()).collect()
    }

    pub fn rack_of(&self, id: &str) -> Option<&str> {
        self.nodes.get(id).map(|n| n.rack())
    }

    /// Mayor id de bloque presente en algún nodo vivo.
    pub fn max_block_id(&self) -> Option<BlockId> {
        self.nodes
            .values()
            .filter_map(|n| n.block_report().ok())
            .filter_map(|ids| ids.last().copied())
            .max()
    }
}
