//! Elección de nodos para las réplicas de un bloque.

use std::collections::{BTreeMap, HashSet, VecDeque};

use common::{DfsError, DfsResult, NodeId, NodeReport};
use tracing::{debug, warn};

/// Resultado de una decisión de ubicación.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub nodes: Vec<NodeId>,
    /// Hay menos nodos de los pedidos
    pub degraded: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PlacementPolicy {
    min_free_bytes: u64,
}

/// Orden de preferencia dentro de un rack: menos escrituras en curso, luego
/// más espacio libre, luego id (para que sea determinista).
fn load_key(n: &NodeReport) -> (u32, std::cmp::Reverse<u64>, &str) {
    (n.in_flight_writes, std::cmp::Reverse(n.free_bytes), n.node_id.as_str())
}

impl PlacementPolicy {
    pub fn new(min_free_bytes: u64) -> Self {
        Self { min_free_bytes }
    }

    fn eligible(&self, n: &NodeReport, block_size: u64, exclude: &HashSet<&str>) -> bool {
        n.alive
            && !exclude.contains(n.node_id.as_str())
            && n.free_bytes >= block_size
            && n.free_bytes - block_size >= self.min_free_bytes
    }

    /// Elige hasta `replication` nodos repartidos entre racks.
    ///
    /// Cada ronda toma el nodo menos cargado de cada rack que aún tenga
    /// candidatos, así ningún rack recibe una segunda réplica mientras quede
    /// uno sin ninguna. Si no alcanzan los nodos la lista es más corta y
    /// `degraded` queda a `true`; sin ningún nodo elegible es un error.
    pub fn choose_placements(
        &self,
        block_size: u64,
        replication: u32,
        nodes: &[NodeReport],
        exclude: &[NodeId],
    ) -> DfsResult<Placement> {
        let exclude: HashSet<&str> = exclude.iter().map(|s| s.as_str()).collect();

        let mut racks: BTreeMap<&str, Vec<&NodeReport>> = BTreeMap::new();
        for n in nodes.iter().filter(|n| self.eligible(n, block_size, &exclude)) {
            racks.entry(n.rack.as_str()).or_default().push(n);
        }
        if racks.is_empty() {
            warn!(
                "ningún nodo elegible para un bloque de {} bytes ({} nodos, {} excluidos)",
                block_size,
                nodes.len(),
                exclude.len()
            );
            return Err(DfsError::NoEligibleNodes);
        }

        let mut queues: Vec<VecDeque<&NodeReport>> = racks
            .into_values()
            .map(|mut v| {
                v.sort_by(|a, b| load_key(a).cmp(&load_key(b)));
                VecDeque::from(v)
            })
            .collect();

        let wanted = replication as usize;
        let mut chosen: Vec<NodeId> = Vec::with_capacity(wanted);

        while chosen.len() < wanted {
            queues.retain(|q| !q.is_empty());
            if queues.is_empty() {
                break;
            }
            // los racks con mejor candidato van primero en cada ronda
            queues.sort_by(|a, b| load_key(a[0]).cmp(&load_key(b[0])));

            for q in queues.iter_mut() {
                if chosen.len() == wanted {
                    break;
                }
                if let Some(n) = q.pop_front() {
                    chosen.push(n.node_id.clone());
                }
            }
        }

        let degraded = chosen.len() < wanted;
        if degraded {
            warn!(
                "replicación degradada: pedidas {} réplicas, sólo {} nodos elegibles",
                wanted,
                chosen.len()
            );
        } else {
            debug!("ubicación elegida: {:?}", chosen);
        }

        Ok(Placement {
            nodes: chosen,
            degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, rack: &str, free: u64, in_flight: u32) -> NodeReport {
        NodeReport {
            node_id: id.to_string(),
            rack: rack.to_string(),
            alive: true,
            free_bytes: free,
            used_bytes: 0,
            in_flight_writes: in_flight,
            block_count: 0,
        }
    }

    fn rack_of<'a>(nodes: &'a [NodeReport], id: &str) -> &'a str {
        &nodes.iter().find(|n| n.node_id == id).unwrap().rack
    }

    #[test]
    fn replicas_span_distinct_racks() {
        let nodes = vec![
            node("a1", "rack-a", 1000, 0),
            node("a2", "rack-a", 1000, 0),
            node("b1", "rack-b", 1000, 0),
            node("b2", "rack-b", 1000, 0),
            node("c1", "rack-c", 1000, 0),
        ];
        let p = PlacementPolicy::new(0)
            .choose_placements(100, 3, &nodes, &[])
            .unwrap();

        assert_eq!(p.nodes.len(), 3);
        assert!(!p.degraded);
        let racks: HashSet<&str> = p.nodes.iter().map(|id| rack_of(&nodes, id)).collect();
        assert_eq!(racks.len(), 3);
    }

    #[test]
    fn second_round_only_after_every_rack_has_one() {
        let nodes = vec![
            node("a1", "rack-a", 1000, 0),
            node("a2", "rack-a", 1000, 0),
            node("b1", "rack-b", 1000, 0),
        ];
        let p = PlacementPolicy::new(0)
            .choose_placements(100, 3, &nodes, &[])
            .unwrap();
        let racks: Vec<&str> = p.nodes.iter().map(|id| rack_of(&nodes, id)).collect();
        assert_eq!(racks.iter().filter(|r| **r == "rack-b").count(), 1);
        assert_eq!(racks.iter().filter(|r| **r == "rack-a").count(), 2);
    }

    #[test]
    fn least_loaded_node_wins_inside_a_rack() {
        let nodes = vec![
            node("a1", "rack-a", 1000, 3),
            node("a2", "rack-a", 500, 0),
        ];
        let p = PlacementPolicy::new(0)
            .choose_placements(100, 1, &nodes, &[])
            .unwrap();
        assert_eq!(p.nodes, vec!["a2".to_string()]);
    }

    #[test]
    fn not_enough_nodes_is_degraded() {
        let nodes = vec![node("a1", "rack-a", 1000, 0), node("b1", "rack-b", 1000, 0)];
        let p = PlacementPolicy::new(0)
            .choose_placements(100, 3, &nodes, &[])
            .unwrap();
        assert_eq!(p.nodes.len(), 2);
        assert!(p.degraded);
    }

    #[test]
    fn dead_full_and_excluded_nodes_are_skipped() {
        let mut dead = node("a1", "rack-a", 1000, 0);
        dead.alive = false;
        let nodes = vec![
            dead,
            node("b1", "rack-b", 150, 0),
            node("c1", "rack-c", 1000, 0),
        ];

        // b1 quedaría con 50 bytes libres, por debajo del mínimo
        let p = PlacementPolicy::new(100)
            .choose_placements(100, 3, &nodes, &[])
            .unwrap();
        assert_eq!(p.nodes, vec!["c1".to_string()]);

        let err = PlacementPolicy::new(100)
            .choose_placements(100, 3, &nodes, &["c1".to_string()])
            .unwrap_err();
        assert!(matches!(err, DfsError::NoEligibleNodes));
    }
}
