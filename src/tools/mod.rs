// src/tools/mod.rs
// Callable tools exposed to the reasoning loops

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::PipelineError;

pub mod catalog;
pub mod mapping;
pub mod search;
pub mod warehouse;

pub use catalog::ColumnMetadataTool;
pub use mapping::MappingFileTool;
pub use search::{SearchIndexClient, SearchRequest};
pub use warehouse::{FetchRecordTool, WarehouseClient};

/// A named callable with a textual input contract. Recoverable failures
/// (bad SQL, missing index hits) come back as `Ok` strings the model must
/// react to; `Err` is reserved for faults that should abort the turn.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    async fn call(&self, input: &str) -> Result<String, PipelineError>;
}

/// The subset of tools wired into one reasoning loop.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Rendered name/description list for the loop prompt.
    pub fn render(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Echoes the input back."
        }

        async fn call(&self, input: &str) -> Result<String, PipelineError> {
            Ok(input.to_string())
        }
    }

    #[tokio::test]
    async fn registry_lookup_and_render() {
        let registry = ToolRegistry::new(vec![Arc::new(EchoTool)]);
        assert_eq!(registry.names(), vec!["echo"]);
        assert!(registry.render().contains("- echo:"));

        let tool = registry.get("echo").unwrap();
        assert_eq!(tool.call("hi").await.unwrap(), "hi");
        assert!(registry.get("missing").is_none());
    }
}
