use crate::error::{OrchestratorError, Result};
use crate::strategy::{BuyAndHold, Strategy};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 可用策略的名稱對照
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 內建策略
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BuyAndHold));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Strategy>> {
        self.strategies.get(name).cloned().ok_or_else(|| {
            OrchestratorError::Validation(format!(
                "不支援的策略: {}，可用策略: {}",
                name,
                self.names().join(", ")
            ))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.strategies.keys().cloned().collect()
    }
}
