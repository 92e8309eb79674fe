//! Opens the upstream WebSocket to the OpenAI Realtime API.

use super::UpstreamConnector;
use crate::ws::{
    frame::{Frame, FrameSink, FrameStream},
    relay::RelayError,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, future};
use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue},
};
use tracing::info;

/// Connects with a bearer credential and the `OpenAI-Beta: realtime=v1` header.
pub struct OpenAiRealtimeConnector {
    endpoint: String,
}

impl OpenAiRealtimeConnector {
    /// `endpoint` is the full `ws(s)://` URL including the `model` query.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl UpstreamConnector for OpenAiRealtimeConnector {
    async fn connect(
        &self,
        credential: &SecretString,
    ) -> Result<(FrameSink, FrameStream), RelayError> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| RelayError::UpstreamConnect(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential.expose_secret()))
            .map_err(|e| RelayError::UpstreamConnect(e.to_string()))?;
        request.headers_mut().insert("Authorization", bearer);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| RelayError::UpstreamConnect(e.to_string()))?;
        info!("Connected to OpenAI Realtime API.");

        let (ws_tx, ws_rx) = ws_stream.split();
        let sink = ws_tx
            .sink_map_err(|e| RelayError::Upstream(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, RelayError>(frame.into_tungstenite())));
        let stream = ws_rx.filter_map(|message| {
            future::ready(match message {
                Ok(message) => Frame::from_tungstenite(message).map(Ok),
                Err(e) => Some(Err(RelayError::Upstream(e.to_string()))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
