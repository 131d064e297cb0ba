use std::{collections::HashSet, time::Duration};

use common::{DfsResult, FsckReport, NodeId};
use tracing::{debug, info, warn};

use crate::dfs::DfsClient;

/// Bucle de mantenimiento: vigila los datanodes, repara bloques
/// sub-replicados y hace checkpoint del namespace cuando el log crece.
pub async fn run(fs: DfsClient, interval: Duration, checkpoint_every: usize) {
    let mut dead: HashSet<NodeId> = HashSet::new();
    loop {
        tokio::time::sleep(interval).await;
        if let Err(e) = sweep(&fs, checkpoint_every, &mut dead).await {
            warn!("monitor: pasada fallida: {}", e);
        }
    }
}

/// Una pasada del monitor. `dead` recuerda qué nodos estaban caídos en la
/// pasada anterior para loguear sólo los cambios.
pub async fn sweep(
    fs: &DfsClient,
    checkpoint_every: usize,
    dead: &mut HashSet<NodeId>,
) -> DfsResult<FsckReport> {
    for report in fs.nodes() {
        if !report.alive && dead.insert(report.node_id.clone()) {
            warn!("datanode {} (rack {}) caído", report.node_id, report.rack);
        } else if report.alive && dead.remove(&report.node_id) {
            info!("datanode {} volvió", report.node_id);
        }
    }

    let fsck_fs = fs.clone();
    let report = tokio::task::spawn_blocking(move || fsck_fs.fsck(true))
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))??;

    let pending = fs.names().pending_edits();
    if checkpoint_every > 0 && pending >= checkpoint_every {
        info!("monitor: checkpoint con {} ediciones pendientes", pending);
        fs.names().checkpoint()?;
    } else {
        debug!("monitor: {} ediciones pendientes", pending);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ClusterConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn sweep_repairs_and_checkpoints() {
        let dir = TempDir::new().unwrap();
        let config = ClusterConfig {
            data_dir: dir.path().to_path_buf(),
            ..ClusterConfig::default()
        };
        let fs = DfsClient::open(&config).unwrap();
        let summary = fs.write_all_to("/f", b"abc", false).unwrap();
        let block = &summary.blocks[0];
        fs.cluster()
            .get(&block.locations[1].node_id)
            .unwrap()
            .delete_block(block.block_id)
            .unwrap();

        let mut dead = HashSet::new();
        let report = sweep(&fs, 1, &mut dead).await.unwrap();
        assert_eq!(report.repaired, vec![block.block_id]);
        assert_eq!(fs.names().pending_edits(), 0);
        assert!(dead.is_empty());
    }
}
