use crate::config::FusionConfig;
use crate::json_graph::load_graph;
use crate::metadata::OpInfoTable;
use crate::pipeline::{FusionContext, Stage};
use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GraphEntry {
    pub id: String,
    /// Relative to the manifest's directory.
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Manifest {
    #[serde(default)]
    pub config: FusionConfig,
    #[serde(default)]
    pub ops: OpInfoTable,
    pub graphs: Vec<GraphEntry>,
}

impl Manifest {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

pub struct LoadStage;

impl Stage for LoadStage {
    fn name(&self) -> &str { "Load Manifest & Graphs" }
    fn run(&self, ctx: &mut FusionContext) -> anyhow::Result<()> {
        let json = fs::read_to_string(&ctx.manifest_path)
            .with_context(|| format!("Failed to read manifest {}", ctx.manifest_path.display()))?;
        let manifest = Manifest::from_json(&json).context("Invalid manifest")?;
        let base = ctx
            .manifest_path
            .parent()
            .ok_or_else(|| anyhow!("Manifest path has no parent directory"))?
            .to_path_buf();

        for entry in &manifest.graphs {
            let path = base.join(&entry.path);
            let json = fs::read_to_string(&path).with_context(|| format!("Failed to read graph {}", path.display()))?;
            let graph = load_graph(&json).with_context(|| format!("Failed to load graph '{}'", entry.id))?;
            log::debug!("loaded '{}': {} nodes", entry.id, graph.node_count());
            if ctx.graphs.insert(entry.id.clone(), graph).is_some() {
                return Err(anyhow!("Duplicate graph id '{}'", entry.id));
            }
        }

        ctx.manifest = Some(manifest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_defaults() {
        let m = Manifest::from_json(r#"{"graphs": [{"id": "main", "path": "main.json"}]}"#).unwrap();
        assert_eq!(m.graphs[0].id, "main");
        assert_eq!(m.config.min_cluster_size, 2);
        assert!(m.ops.is_empty());
    }

    #[test]
    fn manifest_requires_graph_list() {
        assert!(Manifest::from_json(r#"{"config": {}}"#).is_err());
    }
}
