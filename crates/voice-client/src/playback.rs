//! Strict FIFO playback of received audio.
//!
//! The driver task appends decoded frames and wakes the playback task through
//! a [`Notify`]; the playback task reports back on a channel whenever the
//! queue runs dry with nothing in flight.

use crate::capture::AudioSink;
use docweaver_core::audio::AudioFrame;
use std::{collections::VecDeque, sync::Arc};
use tokio::{
    sync::{Mutex, Notify, mpsc},
    task::JoinHandle,
};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct PlaybackQueue {
    frames: VecDeque<AudioFrame>,
    playing: bool,
    played: u64,
}

impl PlaybackQueue {
    pub fn push(&mut self, frame: AudioFrame) {
        self.frames.push_back(frame);
    }

    /// Takes the oldest frame and marks it as in flight.
    pub fn next_frame(&mut self) -> Option<AudioFrame> {
        let frame = self.frames.pop_front();
        self.playing = frame.is_some();
        frame
    }

    pub fn finish_current(&mut self) {
        if self.playing {
            self.playing = false;
            self.played += 1;
        }
    }

    /// Nothing queued and nothing playing.
    pub fn is_idle(&self) -> bool {
        self.frames.is_empty() && !self.playing
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames handed to the sink since creation.
    pub fn played(&self) -> u64 {
        self.played
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.playing = false;
    }
}

pub type SharedQueue = Arc<Mutex<PlaybackQueue>>;
pub type SharedSink = Arc<Mutex<Box<dyn AudioSink>>>;

/// Spawns the task that drains `queue` into `sink`, one frame at a time.
///
/// Runs until aborted.
pub fn spawn_playback(
    queue: SharedQueue,
    sink: SharedSink,
    wake: Arc<Notify>,
    drained_tx: mpsc::UnboundedSender<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next = queue.lock().await.next_frame();
            let Some(frame) = next else {
                wake.notified().await;
                continue;
            };

            let samples = frame.sample_count();
            if let Err(e) = sink.lock().await.play(frame).await {
                warn!(error = %e, "Dropping audio frame the output refused");
            }

            let idle = {
                let mut queue = queue.lock().await;
                queue.finish_current();
                queue.is_idle()
            };
            debug!(samples, idle, "Played audio frame");
            if idle && drained_tx.send(()).is_err() {
                return;
            }
        }
    })
}
