//! Dispatcher construction. Everything the router needs — registry,
//! transports, compiled retry policies, tool executors, event sink — is
//! built here once, explicitly; nothing lives in ambient globals.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::orchestrator::{ToolExecutor, ToolExecutorSet, ToolOrchestrator};
use crate::registry::ProviderRegistry;
use crate::retry::{RetryEngine, RetryPolicy};
use crate::telemetry::{noop_sink, EventSink};
use crate::transport::HttpTransport;
use crate::types::chat::CallClass;
use crate::{Error, Result};

use super::Dispatcher;

pub struct DispatcherBuilder {
    config: Option<DispatchConfig>,
    sink: Option<Arc<dyn EventSink>>,
    executors: ToolExecutorSet,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            sink: None,
            executors: ToolExecutorSet::new(),
        }
    }

    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn config_yaml(self, yaml: &str) -> Result<Self> {
        Ok(self.config(DispatchConfig::from_yaml(yaml)?))
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Register an external collaborator the model may invoke as a tool.
    pub fn tool(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executors.register(executor);
        self
    }

    pub fn build(self) -> Result<Dispatcher> {
        let config = self
            .config
            .ok_or_else(|| Error::configuration("dispatcher requires a configuration"))?;
        let sink = self.sink.unwrap_or_else(noop_sink);

        let registry = Arc::new(ProviderRegistry::from_config(&config)?);

        let mut transports = HashMap::new();
        for descriptor in registry.descriptors() {
            if !transports.contains_key(&descriptor.name) {
                transports.insert(
                    descriptor.name.clone(),
                    Arc::new(HttpTransport::for_descriptor(descriptor)?),
                );
            }
        }

        let mut policies = HashMap::new();
        policies.insert(
            CallClass::Interactive,
            RetryPolicy::from_settings(&config.retry.interactive),
        );
        policies.insert(CallClass::Batch, RetryPolicy::from_settings(&config.retry.batch));

        Ok(Dispatcher {
            registry,
            transports,
            engine: RetryEngine::new(sink),
            policies,
            orchestrator: ToolOrchestrator::new(Arc::new(self.executors), config.tool_loop_cap),
        })
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
