//! Microphone and speaker through cpal.
//!
//! cpal streams are not `Send` on every platform, so each one lives on its
//! own thread. Samples cross between the audio callback and the rest of the
//! bridge through a lock-free `ringbuf` buffer.

use crate::{
    capture::{AudioSink, AudioSource, RateConverter},
    error::BridgeError,
};
use async_trait::async_trait;
use cpal::{
    BuildStreamError, SampleFormat, Stream, StreamConfig,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use docweaver_core::audio::{AudioFrame, REALTIME_PCM16_SAMPLE_RATE};
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Observer, Producer, Split},
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Seconds of audio the ring buffers can hold.
const BUFFER_SECONDS: usize = 2;
/// How often the capture thread drains the ring buffer.
const PUMP_INTERVAL: Duration = Duration::from_millis(20);
/// Resampler chunk, in device-rate samples.
const RESAMPLE_CHUNK: usize = 1024;

fn stream_error(err: cpal::StreamError) {
    error!(error = %err, "Audio stream error");
}

fn build_error(err: BuildStreamError) -> BridgeError {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            BridgeError::PermissionDenied("audio device is not available".to_string())
        }
        other => BridgeError::AudioDevice(other.to_string()),
    }
}

/// Averages interleaved frames down to one channel.
fn downmix(data: &[f32], channels: usize) -> impl Iterator<Item = f32> + '_ {
    data.chunks(channels.max(1))
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
}

/// Signals a device thread to drop its stream and exit.
struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    fn new() -> (Self, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        (Self(flag.clone()), flag)
    }

    fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl Drop for StopFlag {
    fn drop(&mut self) {
        self.raise();
    }
}

/// The default input device, captured as mono 24 kHz.
#[derive(Default)]
pub struct CpalMicrophone {
    stop: Option<StopFlag>,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self::default()
    }
}

fn open_input(
    mut producer: HeapProd<f32>,
) -> Result<(Stream, u32, usize), BridgeError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| BridgeError::PermissionDenied("no microphone is available".to_string()))?;
    let supported = device
        .default_input_config()
        .map_err(|e| BridgeError::PermissionDenied(e.to_string()))?;
    let format = supported.sample_format();
    let config: StreamConfig = supported.config();
    let channels = config.channels as usize;
    let rate = config.sample_rate.0;

    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for sample in downmix(data, channels) {
                    let _ = producer.try_push(sample);
                }
            },
            stream_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels.max(1)) {
                    let sum: f32 = frame.iter().map(|&s| s as f32 / 32768.0).sum();
                    let _ = producer.try_push(sum / frame.len() as f32);
                }
            },
            stream_error,
            None,
        ),
        other => {
            return Err(BridgeError::AudioDevice(format!(
                "unsupported input sample format {other:?}"
            )));
        }
    }
    .map_err(build_error)?;
    stream
        .play()
        .map_err(|e| BridgeError::AudioDevice(e.to_string()))?;
    Ok((stream, rate, channels))
}

#[async_trait]
impl AudioSource for CpalMicrophone {
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<f32>>, BridgeError> {
        self.stop().await;
        let (chunks_tx, chunks_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop, stopped) = StopFlag::new();

        thread::spawn(move || {
            // Sized for the highest common device rate.
            let ring = HeapRb::<f32>::new(48_000 * BUFFER_SECONDS);
            let (producer, mut consumer) = ring.split();
            let (stream, rate, channels) = match open_input(producer) {
                Ok(opened) => opened,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let mut converter =
                match RateConverter::new(rate, REALTIME_PCM16_SAMPLE_RATE, RESAMPLE_CHUNK) {
                    Ok(converter) => converter,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
            info!(rate, channels, "Microphone open");
            let _ = ready_tx.send(Ok(()));

            let mut scratch = vec![0.0f32; RESAMPLE_CHUNK];
            while !stopped.load(Ordering::SeqCst) {
                thread::sleep(PUMP_INTERVAL);
                let mut captured = Vec::new();
                loop {
                    let n = consumer.pop_slice(&mut scratch);
                    if n == 0 {
                        break;
                    }
                    captured.extend_from_slice(&scratch[..n]);
                }
                if captured.is_empty() {
                    continue;
                }
                match converter.process(&captured) {
                    Ok(converted) if converted.is_empty() => {}
                    Ok(converted) => {
                        if chunks_tx.blocking_send(converted).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Dropping capture chunk"),
                }
            }
            drop(stream);
            debug!("Microphone closed");
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                self.stop = Some(stop);
                Ok(chunks_rx)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BridgeError::AudioDevice(
                "microphone thread exited during setup".to_string(),
            )),
        }
    }

    async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.raise();
        }
    }
}

/// The default output device, fed with 24 kHz mono frames.
#[derive(Default)]
pub struct CpalSpeaker {
    output: Option<SpeakerOutput>,
}

struct SpeakerOutput {
    producer: HeapProd<f32>,
    converter: RateConverter,
    stop: StopFlag,
}

impl CpalSpeaker {
    pub fn new() -> Self {
        Self::default()
    }
}

fn open_output(mut consumer: HeapCons<f32>) -> Result<(Stream, u32), BridgeError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| BridgeError::AudioDevice("no audio output is available".to_string()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| BridgeError::AudioDevice(e.to_string()))?;
    if supported.sample_format() != SampleFormat::F32 {
        return Err(BridgeError::AudioDevice(format!(
            "unsupported output sample format {:?}",
            supported.sample_format()
        )));
    }
    let config: StreamConfig = supported.config();
    let channels = config.channels as usize;
    let rate = config.sample_rate.0;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels.max(1)) {
                    let sample = consumer.try_pop().unwrap_or(0.0);
                    frame.fill(sample);
                }
            },
            stream_error,
            None,
        )
        .map_err(build_error)?;
    stream
        .play()
        .map_err(|e| BridgeError::AudioDevice(e.to_string()))?;
    Ok((stream, rate))
}

#[async_trait]
impl AudioSink for CpalSpeaker {
    async fn open(&mut self) -> Result<(), BridgeError> {
        self.close().await;
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop, stopped) = StopFlag::new();
        let ring = HeapRb::<f32>::new(48_000 * BUFFER_SECONDS);
        let (producer, consumer) = ring.split();

        thread::spawn(move || {
            let (stream, rate) = match open_output(consumer) {
                Ok(opened) => opened,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            info!(rate, "Speaker open");
            let _ = ready_tx.send(Ok(rate));
            while !stopped.load(Ordering::SeqCst) {
                thread::sleep(PUMP_INTERVAL);
            }
            drop(stream);
            debug!("Speaker closed");
        });

        let rate = match ready_rx.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BridgeError::AudioDevice(
                    "speaker thread exited during setup".to_string(),
                ));
            }
        };
        let converter = match RateConverter::new(REALTIME_PCM16_SAMPLE_RATE, rate, RESAMPLE_CHUNK) {
            Ok(converter) => converter,
            Err(e) => {
                stop.raise();
                return Err(e);
            }
        };
        self.output = Some(SpeakerOutput {
            producer,
            converter,
            stop,
        });
        Ok(())
    }

    async fn play(&mut self, frame: AudioFrame) -> Result<(), BridgeError> {
        let Some(output) = self.output.as_mut() else {
            return Err(BridgeError::AudioDevice("speaker is not open".to_string()));
        };
        let samples = output.converter.process(&frame.to_f32())?;
        let mut written = 0;
        while written < samples.len() {
            written += output.producer.push_slice(&samples[written..]);
            if written < samples.len() {
                // The device drains the buffer in real time.
                tokio::time::sleep(PUMP_INTERVAL).await;
            }
        }
        // Hold the caller until most of this frame has reached the device.
        while output.producer.occupied_len() > samples.len() / 2 {
            tokio::time::sleep(PUMP_INTERVAL).await;
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(output) = self.output.take() {
            output.stop.raise();
        }
    }
}
