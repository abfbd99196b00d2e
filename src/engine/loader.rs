use async_trait::async_trait;
use tracing::info;

use super::{EngineInitError, EngineLoader, NetEngine, Simulator};
use crate::config::SimulationConfig;
use crate::model::PetriNetData;

/// Loads a net from the editor's JSON document.
///
/// Parsing and compiling run on the blocking pool; large nets with many
/// expressions take noticeable time to compile.
#[derive(Debug, Clone)]
pub struct JsonNetLoader {
    document: String,
    seed: Option<u64>,
    max_operations: u64,
}

impl JsonNetLoader {
    pub fn new(document: impl Into<String>, config: &SimulationConfig) -> Self {
        Self {
            document: document.into(),
            seed: config.seed,
            max_operations: config.max_operations,
        }
    }

    fn build(&self) -> Result<Simulator, EngineInitError> {
        let net: PetriNetData = serde_json::from_str(&self.document)
            .map_err(|e| EngineInitError::new(format!("failed to parse net JSON: {e}")))?;
        let mut simulator = Simulator::new(net)?.with_max_operations(self.max_operations);
        if let Some(seed) = self.seed {
            simulator = simulator.with_seed(seed);
        }
        Ok(simulator)
    }
}

#[async_trait]
impl EngineLoader for JsonNetLoader {
    async fn load(&self) -> Result<Box<dyn NetEngine>, EngineInitError> {
        let loader = self.clone();
        let simulator = tokio::task::spawn_blocking(move || loader.build())
            .await
            .map_err(|e| EngineInitError::new(format!("net compilation task failed: {e}")))??;
        info!("net loaded");
        Ok(Box::new(simulator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_json_is_an_init_error() {
        let loader = JsonNetLoader::new("{ not json", &SimulationConfig::default());
        let err = loader.load().await.err().expect("must fail");
        assert!(err.to_string().contains("failed to parse net JSON"), "{err}");
    }

    #[tokio::test]
    async fn loads_an_empty_net() {
        let loader = JsonNetLoader::new(r#"{ "petriNets": [] }"#, &SimulationConfig::default());
        let engine = loader.load().await.expect("loads");
        assert!(engine.enabled_transitions().expect("query").is_empty());
        assert_eq!(engine.current_time(), 0);
    }
}
