use std::collections::HashMap;

use crate::error::{Result, SimlabError};
use crate::scheduler::StrategyKind;
use crate::workload::{Topology, Workload};

/// What a scenario id resolves to. Either part may be missing; `start`
/// rejects such scenarios with `InvalidConfiguration`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioSpec {
    pub topology: Option<Topology>,
    pub workload: Option<Workload>,
}

impl ScenarioSpec {
    pub fn new(topology: Topology, workload: Workload) -> Self {
        Self {
            topology: Some(topology),
            workload: Some(workload),
        }
    }
}

/// Lookup side of the record store, as seen by the lifecycle manager.
pub trait Catalog: Send + Sync {
    /// Fails with `NotFound` for unknown ids.
    fn scenario(&self, scenario_id: u64) -> Result<ScenarioSpec>;

    /// Fails with `UnknownStrategy` for unknown ids.
    fn strategy(&self, strategy_id: &str) -> Result<StrategyKind>;
}

/// Catalog held in memory. Built-in strategies are registered under their
/// canonical names.
#[derive(Debug, Clone)]
pub struct MemoryCatalog {
    scenarios: HashMap<u64, ScenarioSpec>,
    strategies: HashMap<String, StrategyKind>,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        let strategies = StrategyKind::BUILTIN
            .iter()
            .map(|kind| (kind.to_string(), kind.clone()))
            .collect();
        Self {
            scenarios: HashMap::new(),
            strategies,
        }
    }

    pub fn with_scenario(mut self, scenario_id: u64, spec: ScenarioSpec) -> Self {
        self.scenarios.insert(scenario_id, spec);
        self
    }

    pub fn with_strategy(mut self, strategy_id: impl Into<String>, kind: StrategyKind) -> Self {
        self.strategies.insert(strategy_id.into(), kind);
        self
    }
}

impl Catalog for MemoryCatalog {
    fn scenario(&self, scenario_id: u64) -> Result<ScenarioSpec> {
        self.scenarios
            .get(&scenario_id)
            .cloned()
            .ok_or_else(|| SimlabError::NotFound(format!("scenario {scenario_id}")))
    }

    fn strategy(&self, strategy_id: &str) -> Result<StrategyKind> {
        self.strategies
            .get(strategy_id)
            .cloned()
            .ok_or_else(|| SimlabError::UnknownStrategy(strategy_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve() {
        let catalog = MemoryCatalog::new();
        assert_eq!(catalog.strategy("fcfs").unwrap(), StrategyKind::Fcfs);
        assert_eq!(catalog.strategy("backfill").unwrap(), StrategyKind::Backfill);
        assert_eq!(
            catalog.strategy("conservative-backfill").unwrap(),
            StrategyKind::ConservativeBackfill
        );
        assert!(matches!(
            catalog.strategy("sjf"),
            Err(SimlabError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn scenario_lookup() {
        let catalog = MemoryCatalog::new().with_scenario(
            1,
            ScenarioSpec::new(Topology::new(4), Workload::default()),
        );
        assert!(catalog.scenario(1).is_ok());
        assert!(matches!(catalog.scenario(2), Err(SimlabError::NotFound(_))));
    }
}
