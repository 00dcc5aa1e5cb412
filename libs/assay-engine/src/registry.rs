//! Service registry: the only construction point for environment services.
//!
//! Built once at process start and handed to whatever needs services. New
//! environments are added with [`ServiceRegistry::register`]; existing
//! services are never edited to make room for them.

use assay_common::config::EngineConfig;
use assay_common::types::ExecutionEnvironment;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::code::CodeExecutionService;
use crate::error::EngineError;
use crate::notebook::NotebookService;
use crate::service::ExecutionService;
use crate::sql::QueryService;
use crate::validators::diagram::DiagramValidator;
use crate::validators::document::DocumentValidator;
use crate::validators::spreadsheet::SpreadsheetValidator;
use crate::validators::statistics::StatisticsValidator;
use crate::validators::visualization::VisualizationValidator;

pub type ServiceConstructor = Arc<dyn Fn() -> Arc<dyn ExecutionService> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ServiceRegistry {
    constructors: BTreeMap<ExecutionEnvironment, ServiceConstructor>,
}

impl ServiceRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in environment, configured from `config`
    pub fn with_defaults(config: &EngineConfig) -> Self {
        let mut registry = Self::new();

        let cfg = config.clone();
        registry.register(ExecutionEnvironment::Code, move || {
            Arc::new(CodeExecutionService::new(&cfg))
        });

        let cfg = config.clone();
        registry.register(ExecutionEnvironment::Sql, move || Arc::new(QueryService::new(&cfg)));

        let cfg = config.clone();
        registry.register(ExecutionEnvironment::Notebook, move || {
            Arc::new(NotebookService::new(&cfg))
        });

        registry.register(ExecutionEnvironment::Visualization, || {
            Arc::new(VisualizationValidator::new())
        });
        registry.register(ExecutionEnvironment::Statistics, || {
            Arc::new(StatisticsValidator::new())
        });
        registry.register(ExecutionEnvironment::Diagram, || Arc::new(DiagramValidator::new()));

        let cfg = config.clone();
        registry.register(ExecutionEnvironment::Document, move || {
            Arc::new(DocumentValidator::new(&cfg))
        });

        registry.register(ExecutionEnvironment::Spreadsheet, || {
            Arc::new(SpreadsheetValidator::new())
        });

        registry
    }

    /// Register (or replace) the constructor for an environment
    pub fn register<F>(&mut self, environment: ExecutionEnvironment, constructor: F)
    where
        F: Fn() -> Arc<dyn ExecutionService> + Send + Sync + 'static,
    {
        self.constructors.insert(environment, Arc::new(constructor));
    }

    pub fn get_service(
        &self,
        environment: ExecutionEnvironment,
    ) -> Result<Arc<dyn ExecutionService>, EngineError> {
        self.constructors
            .get(&environment)
            .map(|constructor| constructor())
            .ok_or_else(|| EngineError::UnsupportedEnvironment(environment.to_string()))
    }

    /// Resolve a raw environment tag as stored on testcase records
    pub fn get_service_by_tag(&self, tag: &str) -> Result<Arc<dyn ExecutionService>, EngineError> {
        let environment = ExecutionEnvironment::from_tag(tag)
            .ok_or_else(|| EngineError::UnsupportedEnvironment(tag.to_string()))?;
        self.get_service(environment)
    }

    pub fn environments(&self) -> Vec<ExecutionEnvironment> {
        self.constructors.keys().copied().collect()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("environments", &self.environments())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assay_common::types::{ExecutionRequest, Testcase};

    #[test]
    fn test_defaults_cover_every_environment() {
        let registry = ServiceRegistry::with_defaults(&EngineConfig::default());
        assert_eq!(registry.environments(), ExecutionEnvironment::ALL.to_vec());

        for env in ExecutionEnvironment::ALL {
            let service = registry.get_service(env).unwrap();
            assert_eq!(service.environment(), env);
        }
    }

    #[test]
    fn test_unregistered_environment() {
        let registry = ServiceRegistry::new();
        let err = registry.get_service(ExecutionEnvironment::Sql).err().unwrap();
        assert_eq!(err, EngineError::UnsupportedEnvironment("sql".into()));
    }

    #[test]
    fn test_unknown_tag() {
        let registry = ServiceRegistry::with_defaults(&EngineConfig::default());
        let err = registry.get_service_by_tag("holography").err().unwrap();
        assert_eq!(err, EngineError::UnsupportedEnvironment("holography".into()));
        assert!(registry.get_service_by_tag("Jupyter").is_ok());
    }

    #[tokio::test]
    async fn test_register_replaces_constructor() {
        let mut registry = ServiceRegistry::with_defaults(&EngineConfig::default());
        registry.register(ExecutionEnvironment::Visualization, || {
            Arc::new(DiagramValidator::new())
        });

        let service = registry.get_service(ExecutionEnvironment::Visualization).unwrap();
        let result = service
            .execute(&ExecutionRequest::new("anything", Testcase::default()))
            .await;
        // The diagram validator always defers to review
        assert!(result.passed);
        assert_eq!(service.environment(), ExecutionEnvironment::Diagram);
    }
}
