use std::path::PathBuf;

use crate::market::Scenario;

/// Run configuration. Every field has a default; see `from_env` for the
/// variable names.
#[derive(Debug, Clone, PartialEq)]
pub struct SwarmConfig {
    pub blocks: usize,
    pub entities_per_block: usize,
    pub initial_capital: f64,
    pub base_value: f64,
    pub entity_memory: usize,
    pub block_memory: usize,
    pub global_memory: usize,
    pub cycles: u64,
    pub seed: u64,
    pub entanglement_every: u64,
    pub health_every: u64,
    pub repair_threshold: f64,
    pub repair_each_cycle: bool,
    pub stop_loss_cycles: u32,
    pub buy_fraction: f64,
    pub initial_link_prob: f64,
    pub scenario: Scenario,
    pub start_price: f64,
    pub sqlite_path: Option<PathBuf>,
    pub replay_path: Option<PathBuf>,
    pub cycle_interval_ms: u64,
    pub audit_every: u64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl SwarmConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparsable values fall back to
    /// the default for that field.
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            blocks: get("SWARM_BLOCKS").and_then(|v| v.parse().ok()).unwrap_or(3),
            entities_per_block: get("SWARM_ENTITIES").and_then(|v| v.parse().ok()).unwrap_or(10),
            initial_capital: get("INITIAL_CAPITAL").and_then(|v| v.parse().ok()).unwrap_or(10_000.0),
            base_value: get("BASE_VALUE").and_then(|v| v.parse().ok()).unwrap_or(0.5),
            entity_memory: get("ENTITY_MEMORY").and_then(|v| v.parse().ok()).unwrap_or(10),
            block_memory: get("BLOCK_MEMORY").and_then(|v| v.parse().ok()).unwrap_or(50),
            global_memory: get("GLOBAL_MEMORY").and_then(|v| v.parse().ok()).unwrap_or(200),
            cycles: get("CYCLES").and_then(|v| v.parse().ok()).unwrap_or(720),
            seed: get("SEED").and_then(|v| v.parse().ok()).unwrap_or(42),
            entanglement_every: get("ENTANGLE_EVERY").and_then(|v| v.parse().ok()).unwrap_or(50),
            health_every: get("HEALTH_EVERY").and_then(|v| v.parse().ok()).unwrap_or(50),
            repair_threshold: get("REPAIR_TH").and_then(|v| v.parse().ok()).unwrap_or(0.01),
            repair_each_cycle: get("REPAIR_EACH_CYCLE")
                .map(|v| v == "1" || v == "true")
                .unwrap_or(true),
            stop_loss_cycles: get("STOP_LOSS_CYCLES").and_then(|v| v.parse().ok()).unwrap_or(5),
            buy_fraction: get("BUY_FRACTION").and_then(|v| v.parse().ok()).unwrap_or(0.1),
            initial_link_prob: get("INITIAL_LINK_PROB").and_then(|v| v.parse().ok()).unwrap_or(0.2),
            scenario: get("SCENARIO").and_then(|v| Scenario::parse(&v)).unwrap_or(Scenario::Cyclic),
            start_price: get("START_PRICE").and_then(|v| v.parse().ok()).unwrap_or(50_000.0),
            sqlite_path: get("SQLITE_PATH").filter(|v| !v.is_empty()).map(PathBuf::from),
            replay_path: get("REPLAY_PATH").filter(|v| !v.is_empty()).map(PathBuf::from),
            cycle_interval_ms: get("CYCLE_INTERVAL_MS").and_then(|v| v.parse().ok()).unwrap_or(0),
            audit_every: get("AUDIT_EVERY").and_then(|v| v.parse().ok()).unwrap_or(100),
        }
    }

    pub fn total_entities(&self) -> usize {
        self.blocks * self.entities_per_block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let cfg = SwarmConfig::default();
        assert_eq!(cfg.blocks, 3);
        assert_eq!(cfg.entities_per_block, 10);
        assert_eq!(cfg.cycles, 720);
        assert!(cfg.repair_each_cycle);
        assert_eq!(cfg.scenario, Scenario::Cyclic);
        assert!(cfg.sqlite_path.is_none());
        assert_eq!(cfg.total_entities(), 30);
    }

    #[test]
    fn overrides_and_bad_values() {
        let vars: HashMap<&str, &str> = [
            ("SWARM_BLOCKS", "5"),
            ("SEED", "not-a-number"),
            ("REPAIR_EACH_CYCLE", "false"),
            ("SCENARIO", "crash"),
            ("SQLITE_PATH", "/tmp/ledger.sqlite"),
        ]
        .into_iter()
        .collect();
        let cfg = SwarmConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.blocks, 5);
        assert_eq!(cfg.seed, 42);
        assert!(!cfg.repair_each_cycle);
        assert_eq!(cfg.scenario, Scenario::Crash);
        assert_eq!(cfg.sqlite_path, Some(PathBuf::from("/tmp/ledger.sqlite")));
    }
}
