//! Accepts relay connections and hands each one to its own pair task.

use super::{
    frame::{Frame, FrameSink, FrameStream},
    pair::ConnectionPair,
    relay::{RelayContext, RelayError, run_pair},
};
use crate::{models::ErrorResponse, state::AppState};
use axum::{
    Json,
    extract::{
        State,
        ws::{WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt, future};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Body of the 400 returned for plain HTTP requests to the relay endpoint.
pub const EXPECTED_WEBSOCKET: &str = "Expected WebSocket connection";

/// Axum handler to upgrade an HTTP connection to a relayed voice session.
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match ws {
        Ok(ws) => ws
            .on_failed_upgrade(|e| error!(error = %e, "WebSocket upgrade failed"))
            .on_upgrade(move |socket| handle_socket(socket, state)),
        Err(WebSocketUpgradeRejection::ConnectionNotUpgradable(rejection)) => {
            error!(error = %rejection, "Connection cannot be upgraded");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: rejection.body_text(),
                }),
            )
                .into_response()
        }
        Err(rejection) => {
            warn!(error = %rejection, "Rejected non-WebSocket request");
            (StatusCode::BAD_REQUEST, EXPECTED_WEBSOCKET).into_response()
        }
    }
}

/// Runs one connection pair on the upgraded socket.
#[instrument(name = "relay_session", skip_all, fields(pair_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let pair_id: u32 = rand::random();
    tracing::Span::current().record("pair_id", pair_id);
    info!("New voice client connected");

    let (client_tx, client_rx) = split_client(socket);
    let (pair, ending) = run_pair(
        ConnectionPair::new(pair_id),
        client_tx,
        client_rx,
        RelayContext {
            connector: state.connector.as_ref(),
            credential: state.config.openai_api_key.as_ref(),
            session: &state.session,
        },
    )
    .await;
    info!(?ending, configured = pair.is_configured(), "Voice session finished");
}

/// Adapts the axum socket halves to the relay's frame types.
fn split_client(socket: WebSocket) -> (FrameSink, FrameStream) {
    let (ws_tx, ws_rx) = socket.split();
    let sink = ws_tx
        .sink_map_err(|e| RelayError::Client(e.to_string()))
        .with(|frame: Frame| future::ready(Ok::<_, RelayError>(frame.into_axum())));
    let stream = ws_rx.filter_map(|message| {
        future::ready(match message {
            Ok(message) => Frame::from_axum(message).map(Ok),
            Err(e) => Some(Err(RelayError::Client(e.to_string()))),
        })
    });
    (Box::pin(sink), Box::pin(stream))
}
