//! Optional cluster-map refinement for one narrow structural signature.
//!
//! A cluster made only of the three configured auxiliary roles, in equal
//! numbers, is split into its connected groups of `group_size` nodes, one
//! group per anchor (first role). Anything else is left as it is. Operates on
//! the cluster map only; the graph is read, never written.

use crate::config::RegroupConfig;
use crate::error::FusionError;
use crate::fusion::PendingCluster;
use crate::ir_graph::IRGraph;
use petgraph::stable_graph::NodeIndex;
use petgraph::unionfind::UnionFind;
use std::collections::{BTreeMap, HashMap};

pub fn rebuild_cluster_map(
    graph: &IRGraph,
    clusters: Vec<PendingCluster>,
    config: &RegroupConfig,
    min_size: usize,
) -> Result<Vec<PendingCluster>, FusionError> {
    let mut out = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        if cluster.debug || config.group_size < min_size {
            out.push(cluster);
            continue;
        }
        match split_groups(graph, &cluster.members, config)? {
            Some(groups) => {
                log::debug!("regrouped cluster of {} nodes into {} groups", cluster.members.len(), groups.len());
                out.extend(groups.into_iter().map(|members| PendingCluster { members, debug: false }));
            }
            None => out.push(cluster),
        }
    }
    Ok(out)
}

fn role_of(config: &RegroupConfig, op_type: &str) -> Option<usize> {
    config.roles.iter().position(|r| r == op_type)
}

fn split_groups(
    graph: &IRGraph,
    members: &[NodeIndex],
    config: &RegroupConfig,
) -> Result<Option<Vec<Vec<NodeIndex>>>, FusionError> {
    let size = config.group_size;
    if size == 0 || members.is_empty() || members.len() % size != 0 {
        return Ok(None);
    }

    let mut roles = Vec::with_capacity(members.len());
    let mut counts = [0usize; 3];
    for &idx in members {
        match role_of(config, &graph.node(idx)?.op_type) {
            Some(role) => {
                counts[role] += 1;
                roles.push(role);
            }
            None => return Ok(None),
        }
    }
    if counts[0] != counts[1] || counts[1] != counts[2] {
        return Ok(None);
    }

    let position: HashMap<NodeIndex, usize> = members.iter().enumerate().map(|(i, &m)| (m, i)).collect();
    let mut sets = UnionFind::new(members.len());
    for (i, &idx) in members.iter().enumerate() {
        let neighbours = graph
            .out_data_edges(idx)
            .into_iter()
            .map(|e| e.dst)
            .chain(graph.out_control(idx));
        for dst in neighbours {
            if let Some(&j) = position.get(&dst) {
                sets.union(i, j);
            }
        }
    }

    // Groups keyed by the position of their first member, members in cluster order.
    let mut groups: BTreeMap<usize, (Vec<NodeIndex>, [usize; 3])> = BTreeMap::new();
    let mut first_of: HashMap<usize, usize> = HashMap::new();
    for (i, &idx) in members.iter().enumerate() {
        let root = sets.find(i);
        let key = *first_of.entry(root).or_insert(i);
        let group = groups.entry(key).or_default();
        group.0.push(idx);
        group.1[roles[i]] += 1;
    }

    let anchors = counts[0];
    let per_role = size / 3;
    let valid = groups.len() == anchors
        && size % 3 == 0
        && groups.values().all(|(nodes, c)| nodes.len() == size && c.iter().all(|&n| n == per_role));
    if !valid {
        return Ok(None);
    }
    Ok(Some(groups.into_values().map(|(nodes, _)| nodes).collect()))
}
