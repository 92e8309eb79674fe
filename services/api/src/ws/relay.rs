//! Drives one connection pair from upgrade to teardown.
//!
//! A single task runs a single `select!` loop over both legs, so frames on
//! each socket are forwarded in receipt order and the session configuration
//! is sent upstream right after the `session.created` notice it follows.

use super::{
    frame::{CloseReason, Frame, FrameSink, FrameStream},
    pair::ConnectionPair,
    provider::UpstreamConnector,
};
use docweaver_core::{realtime, session_config::SessionConfig};
use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("upstream credential is not configured")]
    MissingCredential,
    #[error("failed to connect to the realtime service: {0}")]
    UpstreamConnect(String),
    #[error("upstream socket error: {0}")]
    Upstream(String),
    #[error("client socket error: {0}")]
    Client(String),
}

/// Process-wide inputs a pair needs. All read-only.
pub struct RelayContext<'a> {
    pub connector: &'a dyn UpstreamConnector,
    pub credential: Option<&'a SecretString>,
    pub session: &'a SessionConfig,
}

/// Why the relay loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// The credential was missing; no upstream connection was attempted.
    Refused,
    UpstreamUnavailable,
    ClientLeftEarly,
    ClientClosed,
    ClientFailed,
    UpstreamClosed,
    UpstreamFailed,
}

/// Reason sent to the client when the realtime credential is missing.
pub const MISSING_KEY_REASON: &str = "API key not configured";

/// Runs a pair to completion and returns its final state record.
///
/// Both legs are always closed before this returns.
pub async fn run_pair(
    mut pair: ConnectionPair,
    mut client_tx: FrameSink,
    mut client_rx: FrameStream,
    ctx: RelayContext<'_>,
) -> (ConnectionPair, Ending) {
    let Some(credential) = ctx.credential else {
        error!(error = %RelayError::MissingCredential, "Refusing voice session");
        pair.close();
        close_leg(
            &mut client_tx,
            Some(CloseReason::policy_violation(MISSING_KEY_REASON)),
        )
        .await;
        return (pair, Ending::Refused);
    };

    let update_message = match ctx.session.to_update_message() {
        Ok(message) => message,
        Err(e) => {
            error!(error = %e, "Failed to render session configuration");
            pair.close();
            close_leg(&mut client_tx, None).await;
            return (pair, Ending::UpstreamUnavailable);
        }
    };

    // Connecting: wait for the upstream handshake while dropping client frames.
    pair.record_upstream_attempt();
    let connect = ctx.connector.connect(credential);
    tokio::pin!(connect);
    let (mut upstream_tx, mut upstream_rx) = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok(legs) => break legs,
                Err(e) => {
                    error!(error = %e, "Upstream connection failed");
                    pair.close();
                    let _ = client_tx.send(Frame::Text(realtime::upstream_error_notice())).await;
                    close_leg(&mut client_tx, None).await;
                    return (pair, Ending::UpstreamUnavailable);
                }
            },
            frame = client_rx.next() => match frame {
                Some(Ok(Frame::Close(_))) | Some(Err(_)) | None => {
                    info!("Client left before the upstream was ready");
                    pair.close();
                    close_leg(&mut client_tx, None).await;
                    return (pair, Ending::ClientLeftEarly);
                }
                Some(Ok(_)) => {
                    pair.drop_client_frame();
                    debug!(dropped = pair.dropped_client_frames(), "Upstream not open; dropping client frame");
                }
            },
        }
    };

    pair.upstream_opened();
    info!("Upstream open; relaying");

    let ending = if client_tx
        .send(Frame::Text(realtime::connected_notice()))
        .await
        .is_err()
    {
        Ending::ClientFailed
    } else {
        relay_open(
            &mut pair,
            &mut client_tx,
            &mut client_rx,
            &mut upstream_tx,
            &mut upstream_rx,
            &update_message,
        )
        .await
    };

    pair.close();
    close_leg(&mut upstream_tx, None).await;
    close_leg(&mut client_tx, None).await;
    info!(
        ?ending,
        upstream = pair.forwarded_upstream(),
        downstream = pair.forwarded_downstream(),
        dropped = pair.dropped_client_frames(),
        "Connection pair closed"
    );
    (pair, ending)
}

/// Copies frames in both directions until either leg ends.
async fn relay_open(
    pair: &mut ConnectionPair,
    client_tx: &mut FrameSink,
    client_rx: &mut FrameStream,
    upstream_tx: &mut FrameSink,
    upstream_rx: &mut FrameStream,
    update_message: &str,
) -> Ending {
    loop {
        tokio::select! {
            frame = upstream_rx.next() => match frame {
                Some(Ok(Frame::Text(text))) => {
                    if let Some(kind) = realtime::event_type(&text) {
                        debug!(%kind, "From upstream");
                    }
                    let inject = pair.observe_downstream_text(&text);
                    if let Err(e) = client_tx.send(Frame::Text(text)).await {
                        warn!(error = %e, "Failed to forward to client");
                        return Ending::ClientFailed;
                    }
                    if inject {
                        if let Err(e) = upstream_tx.send(Frame::Text(update_message.to_owned())).await {
                            warn!(error = %e, "Failed to send session configuration");
                            return Ending::UpstreamFailed;
                        }
                        pair.mark_configured();
                        info!("Session configuration sent upstream");
                    }
                }
                Some(Ok(Frame::Binary(data))) => {
                    pair.record_forwarded_downstream();
                    if let Err(e) = client_tx.send(Frame::Binary(data)).await {
                        warn!(error = %e, "Failed to forward to client");
                        return Ending::ClientFailed;
                    }
                }
                Some(Ok(Frame::Close(_))) | None => {
                    info!("Upstream disconnected");
                    return Ending::UpstreamClosed;
                }
                Some(Err(e)) => {
                    error!(error = %e, "Upstream error");
                    let _ = client_tx.send(Frame::Text(realtime::upstream_error_notice())).await;
                    return Ending::UpstreamFailed;
                }
            },
            frame = client_rx.next() => match frame {
                Some(Ok(Frame::Close(_))) | None => {
                    info!("Client disconnected");
                    return Ending::ClientClosed;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Client socket error");
                    return Ending::ClientFailed;
                }
                Some(Ok(frame)) => {
                    if !pair.accepts_client_frames() {
                        pair.drop_client_frame();
                        continue;
                    }
                    if let Frame::Text(text) = &frame {
                        if let Some(kind) = realtime::event_type(text) {
                            debug!(%kind, "From client");
                        }
                    }
                    if let Err(e) = upstream_tx.send(frame).await {
                        warn!(error = %e, "Failed to forward upstream");
                        return Ending::UpstreamFailed;
                    }
                    pair.record_forwarded_upstream();
                }
            },
        }
    }
}

/// Best-effort close of one leg; errors mean it is already gone.
async fn close_leg(leg: &mut FrameSink, reason: Option<CloseReason>) {
    if let Err(e) = leg.send(Frame::Close(reason)).await {
        debug!(error = %e, "Close frame not delivered");
    }
    let _ = leg.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::frame::POLICY_VIOLATION;
    use async_trait::async_trait;
    use futures::channel::mpsc;
    use futures_util::{Sink, stream};
    use std::{
        pin::Pin,
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        task::{Context, Poll},
        time::Duration,
    };
    use tokio::sync::oneshot;

    type Log = Arc<Mutex<Vec<(&'static str, Frame)>>>;

    /// A sink that appends to a log shared by both legs, so cross-socket
    /// ordering can be asserted.
    struct LoggedSink {
        side: &'static str,
        log: Log,
        closed: Arc<AtomicBool>,
    }

    impl Sink<Frame> for LoggedSink {
        type Error = RelayError;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), RelayError>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), RelayError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(RelayError::Client("closed".to_string()));
            }
            self.log.lock().unwrap().push((self.side, item));
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), RelayError>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), RelayError>> {
            self.closed.store(true, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    struct Leg {
        sink: FrameSink,
        closed: Arc<AtomicBool>,
    }

    fn logged(side: &'static str, log: &Log) -> Leg {
        let closed = Arc::new(AtomicBool::new(false));
        Leg {
            sink: Box::pin(LoggedSink {
                side,
                log: log.clone(),
                closed: closed.clone(),
            }),
            closed,
        }
    }

    /// Hands out one pre-built upstream leg, optionally after a release signal.
    struct ScriptedConnector {
        attempts: AtomicUsize,
        legs: Mutex<Option<(FrameSink, FrameStream)>>,
        release: Mutex<Option<oneshot::Receiver<()>>>,
    }

    impl ScriptedConnector {
        fn new(sink: FrameSink, stream: FrameStream) -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                legs: Mutex::new(Some((sink, stream))),
                release: Mutex::new(None),
            }
        }

        fn gated(sink: FrameSink, stream: FrameStream, release: oneshot::Receiver<()>) -> Self {
            let connector = Self::new(sink, stream);
            *connector.release.lock().unwrap() = Some(release);
            connector
        }
    }

    #[async_trait]
    impl UpstreamConnector for ScriptedConnector {
        async fn connect(
            &self,
            _credential: &SecretString,
        ) -> Result<(FrameSink, FrameStream), RelayError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let release = self.release.lock().unwrap().take();
            if let Some(release) = release {
                let _ = release.await;
            }
            self.legs
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| RelayError::UpstreamConnect("already used".to_string()))
        }
    }

    struct FailingConnector;

    #[async_trait]
    impl UpstreamConnector for FailingConnector {
        async fn connect(
            &self,
            _credential: &SecretString,
        ) -> Result<(FrameSink, FrameStream), RelayError> {
            Err(RelayError::UpstreamConnect("handshake refused".to_string()))
        }
    }

    fn text(value: serde_json::Value) -> Frame {
        Frame::Text(value.to_string())
    }

    fn frames(items: Vec<Frame>) -> FrameStream {
        Box::pin(stream::iter(items.into_iter().map(Ok)))
    }

    fn channel_stream() -> (mpsc::UnboundedSender<Result<Frame, RelayError>>, FrameStream) {
        let (tx, rx) = mpsc::unbounded();
        (tx, Box::pin(rx))
    }

    fn credential() -> SecretString {
        SecretString::from("sk-test".to_string())
    }

    fn kinds(log: &Log, side: &str) -> Vec<String> {
        log.lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == side)
            .filter_map(|(_, f)| match f {
                Frame::Text(t) => realtime::event_type(t),
                Frame::Close(_) => Some("<close>".to_string()),
                Frame::Binary(_) => Some("<binary>".to_string()),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_configuration_is_injected_between_created_and_audio() {
        let log: Log = Arc::default();
        let client = logged("client", &log);
        let upstream = logged("upstream", &log);
        let connector = ScriptedConnector::new(
            upstream.sink,
            frames(vec![
                text(serde_json::json!({"type": "session.created", "session": {"id": "sess_1"}})),
                text(serde_json::json!({"type": "response.audio.delta", "delta": "AAAA"})),
            ]),
        );
        // The client stays open until the upstream finishes.
        let (_client_feed, client_rx) = channel_stream();
        let session = SessionConfig::default();

        let (pair, ending) = run_pair(
            ConnectionPair::new(7),
            client.sink,
            client_rx,
            RelayContext {
                connector: &connector,
                credential: Some(&credential()),
                session: &session,
            },
        )
        .await;

        assert_eq!(ending, Ending::UpstreamClosed);
        assert!(pair.is_configured());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        let order: Vec<(&str, String)> = log
            .lock()
            .unwrap()
            .iter()
            .map(|(side, frame)| {
                let kind = match frame {
                    Frame::Text(t) => realtime::event_type(t).unwrap_or_default(),
                    Frame::Close(_) => "<close>".to_string(),
                    Frame::Binary(_) => "<binary>".to_string(),
                };
                (*side, kind)
            })
            .collect();
        assert_eq!(
            order,
            vec![
                ("client", "connected".to_string()),
                ("client", "session.created".to_string()),
                ("upstream", "session.update".to_string()),
                ("client", "response.audio.delta".to_string()),
                ("upstream", "<close>".to_string()),
                ("client", "<close>".to_string()),
            ]
        );
        assert!(client.closed.load(Ordering::SeqCst));
        assert!(upstream.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_upstream_frames_are_forwarded_verbatim() {
        let log: Log = Arc::default();
        let client = logged("client", &log);
        let upstream = logged("upstream", &log);
        let raw = r#"{"type":"response.audio_transcript.delta",  "delta":"Hi"}"#;
        let connector = ScriptedConnector::new(
            upstream.sink,
            frames(vec![Frame::Text(raw.to_string())]),
        );
        let (_client_feed, client_rx) = channel_stream();
        let session = SessionConfig::default();

        run_pair(
            ConnectionPair::new(1),
            client.sink,
            client_rx,
            RelayContext {
                connector: &connector,
                credential: Some(&credential()),
                session: &session,
            },
        )
        .await;

        let log = log.lock().unwrap();
        assert!(log.contains(&("client", Frame::Text(raw.to_string()))));
    }

    #[tokio::test]
    async fn test_missing_credential_closes_client_with_policy_violation() {
        let log: Log = Arc::default();
        let client = logged("client", &log);
        let upstream = logged("upstream", &log);
        let connector = ScriptedConnector::new(upstream.sink, frames(vec![]));
        let session = SessionConfig::default();

        let (pair, ending) = run_pair(
            ConnectionPair::new(1),
            client.sink,
            frames(vec![]),
            RelayContext {
                connector: &connector,
                credential: None,
                session: &session,
            },
        )
        .await;

        assert_eq!(ending, Ending::Refused);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(pair.upstream_attempts(), 0);
        assert!(!pair.is_configured());
        assert_eq!(
            log.lock().unwrap().clone(),
            vec![(
                "client",
                Frame::Close(Some(CloseReason {
                    code: POLICY_VIOLATION,
                    reason: MISSING_KEY_REASON.to_string(),
                }))
            )]
        );
        assert!(client.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_client_frames_before_upstream_open_are_dropped() {
        let log: Log = Arc::default();
        let client = logged("client", &log);
        let upstream = logged("upstream", &log);
        let (upstream_feed, upstream_rx) = channel_stream();
        let (release_tx, release_rx) = oneshot::channel();
        let connector = ScriptedConnector::gated(upstream.sink, upstream_rx, release_rx);
        let (client_feed, client_rx) = channel_stream();
        let session = SessionConfig::default();

        client_feed
            .unbounded_send(Ok(text(serde_json::json!({"type": "input_audio_buffer.append", "audio": "AA=="}))))
            .unwrap();
        client_feed
            .unbounded_send(Ok(text(serde_json::json!({"type": "input_audio_buffer.append", "audio": "BB=="}))))
            .unwrap();

        let handle = tokio::spawn(async move {
            run_pair(
                ConnectionPair::new(3),
                client.sink,
                client_rx,
                RelayContext {
                    connector: &connector,
                    credential: Some(&credential()),
                    session: &session,
                },
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        release_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        client_feed
            .unbounded_send(Ok(text(serde_json::json!({"type": "input_audio_buffer.commit"}))))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(client_feed);

        let (pair, ending) = handle.await.unwrap();
        drop(upstream_feed);

        assert_eq!(ending, Ending::ClientClosed);
        assert_eq!(pair.dropped_client_frames(), 2);
        assert_eq!(pair.forwarded_upstream(), 1);
        assert_eq!(kinds(&log, "upstream"), vec!["input_audio_buffer.commit", "<close>"]);
        assert!(upstream.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_client_close_closes_upstream() {
        let log: Log = Arc::default();
        let client = logged("client", &log);
        let upstream = logged("upstream", &log);
        let (_upstream_feed, upstream_rx) = channel_stream();
        let connector = ScriptedConnector::new(upstream.sink, upstream_rx);
        let (client_feed, client_rx) = channel_stream();
        let session = SessionConfig::default();

        let handle = tokio::spawn(async move {
            run_pair(
                ConnectionPair::new(4),
                client.sink,
                client_rx,
                RelayContext {
                    connector: &connector,
                    credential: Some(&credential()),
                    session: &session,
                },
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        client_feed.unbounded_send(Ok(Frame::Close(None))).unwrap();

        let (pair, ending) = handle.await.unwrap();
        assert_eq!(ending, Ending::ClientClosed);
        assert_eq!(pair.phase(), crate::ws::pair::UpstreamPhase::Closed);
        assert!(upstream.closed.load(Ordering::SeqCst));
        assert!(client.closed.load(Ordering::SeqCst));
        assert_eq!(kinds(&log, "upstream"), vec!["<close>"]);
    }

    #[tokio::test]
    async fn test_client_socket_error_closes_upstream() {
        let log: Log = Arc::default();
        let client = logged("client", &log);
        let upstream = logged("upstream", &log);
        let (_upstream_feed, upstream_rx) = channel_stream();
        let connector = ScriptedConnector::new(upstream.sink, upstream_rx);
        let (client_feed, client_rx) = channel_stream();
        let session = SessionConfig::default();

        let handle = tokio::spawn(async move {
            run_pair(
                ConnectionPair::new(8),
                client.sink,
                client_rx,
                RelayContext {
                    connector: &connector,
                    credential: Some(&credential()),
                    session: &session,
                },
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        client_feed
            .unbounded_send(Err(RelayError::Client("connection reset".to_string())))
            .unwrap();

        let (pair, ending) = handle.await.unwrap();
        assert_eq!(ending, Ending::ClientFailed);
        assert_eq!(pair.phase(), crate::ws::pair::UpstreamPhase::Closed);
        assert_eq!(kinds(&log, "upstream"), vec!["<close>"]);
        assert!(upstream.closed.load(Ordering::SeqCst));
        assert!(client.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_client_socket_error_while_connecting_abandons_upstream() {
        let log: Log = Arc::default();
        let client = logged("client", &log);
        let upstream = logged("upstream", &log);
        let (_upstream_feed, upstream_rx) = channel_stream();
        let (_release_tx, release_rx) = oneshot::channel();
        let connector = Arc::new(ScriptedConnector::gated(upstream.sink, upstream_rx, release_rx));
        let (client_feed, client_rx) = channel_stream();
        let session = SessionConfig::default();

        let relay_connector = connector.clone();
        let handle = tokio::spawn(async move {
            run_pair(
                ConnectionPair::new(9),
                client.sink,
                client_rx,
                RelayContext {
                    connector: relay_connector.as_ref(),
                    credential: Some(&credential()),
                    session: &session,
                },
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        client_feed
            .unbounded_send(Err(RelayError::Client("connection reset".to_string())))
            .unwrap();

        let (pair, ending) = handle.await.unwrap();
        assert_eq!(ending, Ending::ClientLeftEarly);
        assert_eq!(pair.phase(), crate::ws::pair::UpstreamPhase::Closed);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert!(kinds(&log, "upstream").is_empty());
        assert_eq!(kinds(&log, "client"), vec!["<close>"]);
        assert!(client.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_upstream_error_notifies_client_then_closes_both() {
        let log: Log = Arc::default();
        let client = logged("client", &log);
        let upstream = logged("upstream", &log);
        let upstream_rx: FrameStream = Box::pin(stream::iter(vec![Err(RelayError::Upstream(
            "connection reset".to_string(),
        ))]));
        let connector = ScriptedConnector::new(upstream.sink, upstream_rx);
        let (_client_feed, client_rx) = channel_stream();
        let session = SessionConfig::default();

        let (pair, ending) = run_pair(
            ConnectionPair::new(5),
            client.sink,
            client_rx,
            RelayContext {
                connector: &connector,
                credential: Some(&credential()),
                session: &session,
            },
        )
        .await;

        assert_eq!(ending, Ending::UpstreamFailed);
        assert!(!pair.is_configured());
        assert_eq!(kinds(&log, "client"), vec!["connected", "error", "<close>"]);
        assert!(upstream.closed.load(Ordering::SeqCst));
        assert!(client.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_connect_failure_sends_error_notice() {
        let log: Log = Arc::default();
        let client = logged("client", &log);
        let (_client_feed, client_rx) = channel_stream();
        let session = SessionConfig::default();

        let (pair, ending) = run_pair(
            ConnectionPair::new(6),
            client.sink,
            client_rx,
            RelayContext {
                connector: &FailingConnector,
                credential: Some(&credential()),
                session: &session,
            },
        )
        .await;

        assert_eq!(ending, Ending::UpstreamUnavailable);
        assert_eq!(pair.upstream_attempts(), 1);
        assert_eq!(kinds(&log, "client"), vec!["error", "<close>"]);
        assert!(client.closed.load(Ordering::SeqCst));
    }
}
