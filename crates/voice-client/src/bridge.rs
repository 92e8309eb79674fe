//! Connects local audio to the relay.
//!
//! One driver task owns the socket, the capture stream and the transcript;
//! one playback task drains the [`PlaybackQueue`](crate::playback::PlaybackQueue).
//! State and transcript are published on `watch` channels.

use crate::{
    capture::{AudioSink, AudioSource, FrameSlicer},
    error::BridgeError,
    playback::{SharedQueue, SharedSink, spawn_playback},
    state::{ConnectionState, SessionMachine},
    transcript::Transcript,
};
use docweaver_core::{
    audio::{AudioFrame, CAPTURE_FRAME_SAMPLES},
    realtime::{self, RealtimeEvent, RelayNotice, ServerEvent},
};
use futures_util::{SinkExt, StreamExt};
use std::{sync::Arc, time::Duration};
use tokio::{
    net::TcpStream,
    sync::{Mutex, Notify, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, instrument, warn};

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SharedSource = Arc<Mutex<Box<dyn AudioSource>>>;

/// How long `disconnect()` waits for the driver to close the socket.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// State shared between the bridge handle and its driver task.
struct Shared {
    machine: Mutex<SessionMachine>,
    state_tx: watch::Sender<ConnectionState>,
    transcript_tx: watch::Sender<String>,
}

impl Shared {
    /// Runs one transition and publishes the resulting state if it changed.
    async fn update<R>(&self, transition: impl FnOnce(&mut SessionMachine) -> R) -> R {
        let mut machine = self.machine.lock().await;
        let result = transition(&mut machine);
        let next = machine.state();
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = %current, to = %next, "Voice state changed");
            *current = next;
            true
        });
        result
    }

    async fn can_send_audio(&self) -> bool {
        self.machine.lock().await.can_send_audio()
    }

    fn publish_transcript(&self, transcript: &Transcript) {
        self.transcript_tx.send_replace(transcript.render());
    }

    /// Synchronous `reset` for teardown paths that cannot await.
    fn try_reset(&self) {
        if let Ok(mut machine) = self.machine.try_lock() {
            machine.reset();
            self.state_tx.send_replace(machine.state());
        }
        self.transcript_tx.send_replace(String::new());
    }
}

struct Running {
    driver: JoinHandle<()>,
    playback: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

/// Client audio bridge for one relay endpoint.
pub struct VoiceBridge {
    url: String,
    source: SharedSource,
    sink: SharedSink,
    queue: SharedQueue,
    shared: Arc<Shared>,
    running: Option<Running>,
}

impl VoiceBridge {
    /// `url` is the relay's `ws(s)://.../realtime-voice` endpoint.
    pub fn new(
        url: impl Into<String>,
        source: Box<dyn AudioSource>,
        sink: Box<dyn AudioSink>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (transcript_tx, _) = watch::channel(String::new());
        Self {
            url: url.into(),
            source: Arc::new(Mutex::new(source)),
            sink: Arc::new(Mutex::new(sink)),
            queue: SharedQueue::default(),
            shared: Arc::new(Shared {
                machine: Mutex::new(SessionMachine::default()),
                state_tx,
                transcript_tx,
            }),
            running: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// The transcript, one `AI: ` or `You: ` line per utterance.
    pub fn transcript(&self) -> String {
        self.shared.transcript_tx.borrow().clone()
    }

    pub fn subscribe_transcript(&self) -> watch::Receiver<String> {
        self.shared.transcript_tx.subscribe()
    }

    /// Frames received but not yet handed to the output.
    pub async fn queued_frames(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Starts capture, opens the output and connects to the relay.
    ///
    /// Audio is only sent once the relay reports `session.updated`.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn connect(&mut self) -> Result<(), BridgeError> {
        self.reap_finished().await;
        self.shared.update(SessionMachine::begin_connect).await?;
        info!("Connecting voice session");

        let capture_rx = match self.source.lock().await.start().await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "Microphone unavailable");
                self.shared.update(SessionMachine::connect_refused).await;
                return Err(e);
            }
        };
        if let Err(e) = self.sink.lock().await.open().await {
            warn!(error = %e, "Audio output unavailable");
            self.source.lock().await.stop().await;
            self.shared.update(SessionMachine::connect_refused).await;
            return Err(e);
        }

        let socket = match connect_async(self.url.as_str()).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                warn!(error = %e, "Relay connection failed");
                self.release_audio().await;
                self.shared.update(SessionMachine::socket_closed).await;
                return Err(e.into());
            }
        };
        self.shared.update(SessionMachine::socket_opened).await;
        info!("Relay socket open; awaiting session configuration");

        let wake = Arc::new(Notify::new());
        let (drained_tx, drained_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let playback = spawn_playback(self.queue.clone(), self.sink.clone(), wake.clone(), drained_tx);
        let driver = tokio::spawn(drive(
            socket,
            Channels {
                capture_rx,
                drained_rx,
                shutdown_rx,
            },
            self.shared.clone(),
            self.queue.clone(),
            wake,
        ));
        self.running = Some(Running {
            driver,
            playback,
            shutdown,
        });
        Ok(())
    }

    /// Stops capture, closes the socket and the output, and clears the
    /// queue and transcript.
    ///
    /// Idempotent; safe when never connected.
    pub async fn disconnect(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown.send(());
            let abort = running.driver.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, running.driver)
                .await
                .is_err()
            {
                warn!("Driver did not stop in time; aborting");
                abort.abort();
            }
            running.playback.abort();
            let _ = running.playback.await;
            info!("Voice session disconnected");
        }
        self.release_audio().await;
        self.shared.update(SessionMachine::reset).await;
        self.shared.publish_transcript(&Transcript::default());
    }

    /// Cleans up after a session the relay ended on its own.
    async fn reap_finished(&mut self) {
        // The driver publishes `Closed` just before it returns.
        let closed = self.state() == ConnectionState::Closed;
        let finished = self
            .running
            .as_ref()
            .is_some_and(|running| closed || running.driver.is_finished());
        if finished {
            if let Some(running) = self.running.take() {
                let abort = running.driver.abort_handle();
                if tokio::time::timeout(SHUTDOWN_GRACE, running.driver).await.is_err() {
                    abort.abort();
                }
                running.playback.abort();
                let _ = running.playback.await;
            }
            self.release_audio().await;
            self.shared.publish_transcript(&Transcript::default());
        }
    }

    async fn release_audio(&mut self) {
        self.source.lock().await.stop().await;
        self.sink.lock().await.close().await;
        self.queue.lock().await.clear();
    }
}

impl Drop for VoiceBridge {
    /// Dropped without `disconnect()`: stop both tasks and hand the devices
    /// to a cleanup task on the current runtime.
    fn drop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.driver.abort();
        running.playback.abort();
        if let Ok(mut queue) = self.queue.try_lock() {
            queue.clear();
        }
        self.shared.try_reset();

        let source = self.source.clone();
        let sink = self.sink.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    source.lock().await.stop().await;
                    sink.lock().await.close().await;
                    debug!("Audio released after bridge drop");
                });
            }
            // Devices release themselves when their handles drop.
            Err(_) => warn!("Bridge dropped outside a runtime; skipping audio shutdown"),
        }
    }
}

struct Channels {
    capture_rx: mpsc::Receiver<Vec<f32>>,
    drained_rx: mpsc::UnboundedReceiver<()>,
    shutdown_rx: oneshot::Receiver<()>,
}

/// The driver loop: relay socket, capture stream, playback feedback, shutdown.
async fn drive(
    socket: RelaySocket,
    channels: Channels,
    shared: Arc<Shared>,
    queue: SharedQueue,
    wake: Arc<Notify>,
) {
    let Channels {
        mut capture_rx,
        mut drained_rx,
        mut shutdown_rx,
    } = channels;
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut slicer = FrameSlicer::new(CAPTURE_FRAME_SAMPLES);
    let mut transcript = Transcript::default();
    let mut capture_open = true;
    let mut dropped_frames: u64 = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            message = ws_rx.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    handle_event(text.as_str(), &shared, &queue, &wake, &mut transcript).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Relay closed the session");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Relay socket error");
                    break;
                }
                None => {
                    info!("Relay socket ended");
                    break;
                }
            },
            chunk = capture_rx.recv(), if capture_open => match chunk {
                Some(samples) => {
                    let mut failed = false;
                    for frame in slicer.push(&samples) {
                        if !shared.can_send_audio().await {
                            dropped_frames += 1;
                            continue;
                        }
                        let append = match realtime::input_audio_append(AudioFrame::from_f32(&frame).encode()) {
                            Ok(append) => append,
                            Err(e) => {
                                warn!(error = %e, "Failed to encode audio frame");
                                continue;
                            }
                        };
                        if let Err(e) = ws_tx.send(Message::Text(append.into())).await {
                            warn!(error = %e, "Failed to send audio");
                            failed = true;
                            break;
                        }
                    }
                    if failed {
                        break;
                    }
                }
                None => {
                    debug!("Capture stream ended");
                    capture_open = false;
                }
            },
            Some(()) = drained_rx.recv() => {
                if queue.lock().await.is_idle() {
                    shared.update(SessionMachine::playback_drained).await;
                }
            }
        }
    }

    if dropped_frames > 0 {
        debug!(dropped_frames, "Capture frames dropped while not active");
    }
    shared.update(SessionMachine::socket_closed).await;
    let _ = ws_tx.close().await;
}

async fn handle_event(
    text: &str,
    shared: &Shared,
    queue: &SharedQueue,
    wake: &Notify,
    transcript: &mut Transcript,
) {
    let event = match RealtimeEvent::parse(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable relay message");
            return;
        }
    };

    match &event {
        RealtimeEvent::Relay(RelayNotice::Connected) => info!("Relay connected upstream"),
        RealtimeEvent::Relay(RelayNotice::Error { error }) => {
            warn!(message = %error, "Relay reported an error");
        }
        RealtimeEvent::Unhandled(kind) => {
            debug!(%kind, "Ignoring relay message");
            return;
        }
        RealtimeEvent::Server(server) => match server.as_ref() {
            ServerEvent::SessionCreated(_) => debug!("Upstream session created"),
            ServerEvent::SessionUpdated(_) => info!("Session configured; streaming audio"),
            ServerEvent::ResponseAudioDelta(audio) => match AudioFrame::decode(&audio.delta) {
                Ok(frame) => {
                    queue.lock().await.push(frame);
                    wake.notify_one();
                }
                Err(e) => {
                    warn!(error = %e, "Dropping undecodable audio delta");
                    return;
                }
            },
            ServerEvent::ResponseAudioTranscriptDelta(text) => {
                transcript.append_assistant(&text.delta);
                shared.publish_transcript(transcript);
            }
            ServerEvent::ConversationItemInputAudioTranscriptionCompleted(done) => {
                transcript.push_user(&done.transcript);
                shared.publish_transcript(transcript);
            }
            ServerEvent::Error(failure) => {
                warn!(
                    kind = %failure.error.r#type,
                    message = %failure.error.message,
                    "Upstream reported an error"
                );
            }
            _ => {}
        },
    }
    shared.update(|machine| machine.apply(&event)).await;
}
