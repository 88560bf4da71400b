use dashmap::DashMap;
use std::sync::Arc;

use super::{dialects, EngineError, EngineSpec};

/// Dialect id -> engine spec, shared read-mostly across queries
pub struct EngineSpecRegistry {
    specs: DashMap<String, Arc<EngineSpec>>,
    aliases: DashMap<String, String>,
}

impl EngineSpecRegistry {
    /// Registry with no dialects
    pub fn empty() -> Self {
        Self {
            specs: DashMap::new(),
            aliases: DashMap::new(),
        }
    }

    /// Registry with the built-in dialects and their aliases
    pub fn new() -> Self {
        let registry = Self::empty();
        for spec in dialects::builtins() {
            registry.register(spec);
        }
        registry.register_alias("postgresql", "postgres");
        registry.register_alias("sqlserver", "mssql");
        registry.register_alias("mariadb", "mysql");
        registry
    }

    /// Add or replace a spec under its own id
    pub fn register(&self, spec: EngineSpec) -> Arc<EngineSpec> {
        let spec = Arc::new(spec);
        self.specs.insert(spec.id.clone(), Arc::clone(&spec));
        tracing::debug!(dialect = %spec.id, "Registered engine spec");
        spec
    }

    pub fn register_alias(&self, alias: &str, target: &str) {
        self.aliases.insert(alias.to_lowercase(), target.to_lowercase());
    }

    /// Case-insensitive lookup honouring aliases
    pub fn resolve(&self, dialect: &str) -> Result<Arc<EngineSpec>, EngineError> {
        let mut id = dialect.trim().to_lowercase();
        if let Some(target) = self.aliases.get(&id) {
            id = target.value().clone();
        }
        self.specs
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::UnknownDialect(dialect.to_string()))
    }

    pub fn dialects(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.specs.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

impl Default for EngineSpecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LimitStrategy;

    #[test]
    fn test_resolve_aliases_and_case() {
        let registry = EngineSpecRegistry::new();
        assert_eq!(registry.resolve("PostgreSQL").unwrap().id, "postgres");
        assert_eq!(registry.resolve("sqlserver").unwrap().id, "mssql");
        assert_eq!(registry.resolve("MariaDB").unwrap().id, "mysql");
        assert_eq!(registry.resolve(" sqlite ").unwrap().id, "sqlite");
    }

    #[test]
    fn test_unknown_dialect() {
        let registry = EngineSpecRegistry::new();
        assert_eq!(
            registry.resolve("db2").unwrap_err(),
            EngineError::UnknownDialect("db2".to_string())
        );
        assert!(EngineSpecRegistry::empty().resolve("sqlite").is_err());
    }

    #[test]
    fn test_register_custom_spec() {
        let registry = EngineSpecRegistry::new();
        registry.register(EngineSpec::new("Vertica").with_limit_strategy(LimitStrategy::Wrap));
        registry.register_alias("vertica_odbc", "vertica");

        let spec = registry.resolve("vertica_odbc").unwrap();
        assert_eq!(spec.limit_strategy, LimitStrategy::Wrap);
        assert!(registry.dialects().contains(&"vertica".to_string()));
    }
}
