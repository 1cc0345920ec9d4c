//! Config fields definitions for cost model construction.

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CostModelConfig {
    /// Per-dimension cost scale. Every cost-vector dimension is bounded by
    /// this value, so a flattened cost never exceeds omega times the number
    /// of dimensions.
    pub omega: i64,
    /// Cap on the number of placement-slot equivalence classes generated per
    /// machine. A machine asking for more slots than this is clamped.
    pub max_multi_arcs_for_cpu: u64,
    /// Capacity of the leaf-to-sink arc when the enclosing machine carries
    /// no pod cap of its own.
    pub max_tasks_per_pu: u64,
}

impl Default for CostModelConfig {
    fn default() -> Self {
        Self {
            omega: 1000,
            max_multi_arcs_for_cpu: 50,
            max_tasks_per_pu: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CostModelConfig;

    #[test]
    fn test_default_config() {
        let config = CostModelConfig::default();
        assert_eq!(config.omega, 1000);
        assert_eq!(config.max_multi_arcs_for_cpu, 50);
        assert_eq!(config.max_tasks_per_pu, 100);
    }

    #[test]
    fn test_config_from_yaml_with_defaults() {
        let config = serde_yaml::from_str::<CostModelConfig>(
            r#"
            omega: 500
            "#,
        )
        .unwrap();
        assert_eq!(config.omega, 500);
        assert_eq!(config.max_multi_arcs_for_cpu, 50);
        assert_eq!(config.max_tasks_per_pu, 100);
    }
}
