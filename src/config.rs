use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Signature for the cluster-map regrouping post-pass.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RegroupConfig {
    /// Operator types of the three auxiliary roles, in group order.
    pub roles: [String; 3],
    #[serde(default = "default_group_size")]
    pub group_size: usize,
}

fn default_group_size() -> usize {
    3
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FusionConfig {
    pub min_cluster_size: usize,
    pub target_library: String,
    pub deny_list: BTreeSet<String>,
    pub passthrough_ops: BTreeSet<String>,
    pub control_flow_ops: BTreeSet<String>,
    pub debug_fuse_ops: BTreeSet<String>,
    pub enable_private_accel: bool,
    /// Whole-pass shape veto used by threaded execution.
    pub shape_check: bool,
    pub non_mergeable_ops: BTreeSet<String>,
    pub regroup: Option<RegroupConfig>,
    pub max_descriptor_bytes: usize,
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 2,
            target_library: "cpu_kernel".to_string(),
            deny_list: BTreeSet::new(),
            passthrough_ops: set(&["Data", "NetOutput", "NoOp"]),
            control_flow_ops: set(&["If", "While", "Case", "StreamSwitch", "StreamMerge"]),
            debug_fuse_ops: BTreeSet::new(),
            enable_private_accel: true,
            shape_check: false,
            non_mergeable_ops: set(&["Identity", "Reshape"]),
            regroup: None,
            max_descriptor_bytes: i32::MAX as usize,
        }
    }
}

impl FusionConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_min_cluster_size(mut self, size: usize) -> Self {
        self.min_cluster_size = size;
        self
    }

    pub fn effective_min_size(&self) -> usize {
        self.min_cluster_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = FusionConfig::from_json(r#"{"min_cluster_size": 3, "deny_list": ["Where"]}"#).unwrap();
        assert_eq!(cfg.min_cluster_size, 3);
        assert!(cfg.deny_list.contains("Where"));
        assert_eq!(cfg.target_library, "cpu_kernel");
        assert!(cfg.passthrough_ops.contains("NetOutput"));
        assert!(cfg.regroup.is_none());
    }

    #[test]
    fn zero_threshold_means_one() {
        assert_eq!(FusionConfig::default().with_min_cluster_size(0).effective_min_size(), 1);
    }

    #[test]
    fn regroup_group_size_defaults_to_three() {
        let cfg = FusionConfig::from_json(r#"{"regroup": {"roles": ["VarShadow", "VarRead", "VarAssign"]}}"#).unwrap();
        assert_eq!(cfg.regroup.unwrap().group_size, 3);
    }
}
