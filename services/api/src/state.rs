//! Shared Application State
//!
//! Everything here is created once at startup and is read-only afterwards;
//! no state is shared between connection pairs.

use crate::{
    config::Config,
    ws::provider::{OpenAiRealtimeConnector, UpstreamConnector},
};
use docweaver_core::{
    docs::{DocPrompts, DocService},
    generator::{DocGenerator, GatewayDocGenerator},
    session_config::SessionConfig,
};
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Configuration pushed upstream after `session.created`.
    pub session: Arc<SessionConfig>,
    pub connector: Arc<dyn UpstreamConnector>,
    /// `None` when no gateway credential is configured.
    pub docs: Option<Arc<DocService>>,
}

impl AppState {
    /// Wires the production upstream connector and gateway client.
    pub fn new(config: Config, prompts: DocPrompts) -> Self {
        let connector = Arc::new(OpenAiRealtimeConnector::new(config.realtime_endpoint()));
        let generator = config.gateway_api_key.clone().map(|key| {
            Arc::new(GatewayDocGenerator::new(
                &config.gateway_url,
                key,
                config.docs_model.clone(),
            )) as Arc<dyn DocGenerator>
        });
        if generator.is_none() {
            warn!("AI_GATEWAY_API_KEY is not set; documentation requests will fail");
        }
        Self::with_parts(config, prompts, connector, generator)
    }

    /// Builds the state from explicit collaborators.
    pub fn with_parts(
        config: Config,
        prompts: DocPrompts,
        connector: Arc<dyn UpstreamConnector>,
        generator: Option<Arc<dyn DocGenerator>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            session: Arc::new(SessionConfig::default()),
            connector,
            docs: generator.map(|generator| Arc::new(DocService::new(generator, prompts))),
        }
    }
}
