//! # Audio Playback
//!
//! Output side of the relay pipeline. The session talks to an [`AudioOutput`]
//! in three steps, mirroring how a browser audio graph is assembled:
//!
//! 1. **open**: acquire the output device context at a fixed rate and channel count
//! 2. **attach**: connect the playback pipeline and hand back a [`PlaybackSink`]
//! 3. **detach / close**: disconnect the pipeline and release the device
//!
//! ## Threading:
//! `cpal::Stream` is not `Send`, so [`CpalOutput`] keeps it on a dedicated device
//! thread. Samples travel from the socket task through an unbounded channel into a
//! ring buffer that the stream callback drains. Nothing on the network side ever
//! blocks on the sound card.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Sample rate of the remote listen feed. No resampling is performed, so the
/// output device must run at exactly this rate.
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Stereo output; mono feed samples are copied to both channels.
pub const DEFAULT_CHANNELS: u16 = 2;

/// Seconds of audio the ring buffer can hold before new samples are dropped.
const RING_BUFFER_SECONDS: usize = 2;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio output device found")]
    NoOutputDevice,

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    #[error("Output device context is not open")]
    NotOpen,

    #[error("Playback pipeline is not attached")]
    NotAttached,

    #[error("Audio device thread stopped unexpectedly")]
    DeviceThreadGone,
}

/// Output stream shape requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for PlaybackFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
        }
    }
}

/// Non-blocking handle the relay session pushes converted samples into.
#[derive(Debug, Clone)]
pub struct PlaybackSink {
    tx: mpsc::UnboundedSender<Vec<f32>>,
}

impl PlaybackSink {
    /// Create a sink together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Vec<f32>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Schedule a buffer for rendering. Never waits on the device.
    pub fn play(&self, samples: Vec<f32>) -> Result<(), AudioError> {
        self.tx.send(samples).map_err(|_| AudioError::NotAttached)
    }
}

/// An audio output the relay session can acquire, feed, and release.
///
/// `detach` and `close` must succeed as no-ops when there is nothing to release,
/// so teardown can run against a partially started session.
#[async_trait]
pub trait AudioOutput: Send {
    /// Acquire the output device context.
    async fn open(&mut self, format: PlaybackFormat) -> Result<(), AudioError>;

    /// Connect the playback pipeline to the open context.
    fn attach(&mut self) -> Result<PlaybackSink, AudioError>;

    /// Disconnect the playback pipeline and discard queued samples.
    fn detach(&mut self) -> Result<(), AudioError>;

    /// Release the device context, completing once the device has stopped.
    async fn close(&mut self) -> Result<(), AudioError>;
}

enum DeviceCommand {
    Close(oneshot::Sender<()>),
}

struct DeviceContext {
    commands: std_mpsc::Sender<DeviceCommand>,
    ring: Arc<Mutex<HeapRb<f32>>>,
}

/// [`AudioOutput`] backed by the default `cpal` output device.
#[derive(Default)]
pub struct CpalOutput {
    context: Option<DeviceContext>,
    forwarder: Option<JoinHandle<()>>,
}

impl CpalOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AudioOutput for CpalOutput {
    async fn open(&mut self, format: PlaybackFormat) -> Result<(), AudioError> {
        if self.context.is_some() {
            return Ok(());
        }

        let capacity = format.sample_rate as usize * RING_BUFFER_SECONDS;
        let ring = Arc::new(Mutex::new(HeapRb::<f32>::new(capacity)));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (commands, command_rx) = std_mpsc::channel();

        let device_ring = Arc::clone(&ring);
        thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || run_device(format, device_ring, command_rx, ready_tx))
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        ready_rx.await.map_err(|_| AudioError::DeviceThreadGone)??;

        info!(
            "Audio output opened: {} Hz, {} channel(s)",
            format.sample_rate, format.channels
        );
        self.context = Some(DeviceContext { commands, ring });
        Ok(())
    }

    fn attach(&mut self) -> Result<PlaybackSink, AudioError> {
        self.detach()?;
        let context = self.context.as_ref().ok_or(AudioError::NotOpen)?;

        let (sink, mut frames) = PlaybackSink::channel();
        let ring = Arc::clone(&context.ring);

        self.forwarder = Some(tokio::spawn(async move {
            while let Some(samples) = frames.recv().await {
                let dropped = push_samples(&mut ring.lock(), samples);
                if dropped > 0 {
                    debug!("Playback buffer full, dropped {} samples", dropped);
                }
            }
        }));

        Ok(sink)
    }

    fn detach(&mut self) -> Result<(), AudioError> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(context) = &self.context {
            let mut buffer = context.ring.lock();
            while buffer.try_pop().is_some() {}
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), AudioError> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        let Some(context) = self.context.take() else {
            return Ok(());
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        context
            .commands
            .send(DeviceCommand::Close(ack_tx))
            .map_err(|_| AudioError::DeviceThreadGone)?;
        ack_rx.await.map_err(|_| AudioError::DeviceThreadGone)?;

        info!("Audio output closed");
        Ok(())
    }
}

/// Body of the device thread: owns the stream until told to close.
fn run_device(
    format: PlaybackFormat,
    ring: Arc<Mutex<HeapRb<f32>>>,
    commands: std_mpsc::Receiver<DeviceCommand>,
    ready: oneshot::Sender<Result<(), AudioError>>,
) {
    let stream = match build_stream(format, ring) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    // A dropped command sender also ends the thread.
    if let Ok(DeviceCommand::Close(ack)) = commands.recv() {
        drop(stream);
        let _ = ack.send(());
    }
}

fn build_stream(
    format: PlaybackFormat,
    ring: Arc<Mutex<HeapRb<f32>>>,
) -> Result<Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;

    let config = StreamConfig {
        channels: format.channels,
        sample_rate: SampleRate(format.sample_rate),
        buffer_size: BufferSize::Default,
    };
    let channels = format.channels.max(1) as usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                fill_output(data, channels, &mut ring.lock());
            },
            |err| {
                error!("Audio playback error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    Ok(stream)
}

/// Queue samples for the device. A full buffer drops the newest samples rather
/// than waiting; returns how many were dropped.
fn push_samples(ring: &mut HeapRb<f32>, samples: Vec<f32>) -> usize {
    let mut dropped = 0;
    for sample in samples {
        if ring.try_push(sample).is_err() {
            dropped += 1;
        }
    }
    dropped
}

/// Fill one interleaved output buffer. Each queued mono sample is written to
/// every channel of a frame; an empty ring plays silence.
fn fill_output(data: &mut [f32], channels: usize, ring: &mut HeapRb<f32>) {
    for frame in data.chunks_mut(channels.max(1)) {
        let sample = ring.try_pop().unwrap_or(0.0);
        frame.fill(sample);
    }
}

/// Recording stand-in for the sound card, shared by the session and dialer tests.
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::time::Duration;

    #[derive(Clone, Default)]
    pub struct OutputLog {
        events: Arc<Mutex<Vec<&'static str>>>,
        frames: Arc<Mutex<Vec<Vec<f32>>>>,
    }

    impl OutputLog {
        pub fn events(&self) -> Vec<&'static str> {
            self.events.lock().clone()
        }

        pub fn count(&self, event: &str) -> usize {
            self.events.lock().iter().filter(|e| **e == event).count()
        }

        pub fn frames(&self) -> Vec<Vec<f32>> {
            self.frames.lock().clone()
        }

        pub async fn wait_for_frames(&self, n: usize) -> Vec<Vec<f32>> {
            for _ in 0..200 {
                if self.frames.lock().len() >= n {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            self.frames()
        }

        fn push(&self, event: &'static str) {
            self.events.lock().push(event);
        }
    }

    pub struct RecordingOutput {
        log: OutputLog,
        fail_open: bool,
        fail_detach: bool,
        forwarder: Option<JoinHandle<()>>,
    }

    impl RecordingOutput {
        pub fn new(log: OutputLog) -> Self {
            Self {
                log,
                fail_open: false,
                fail_detach: false,
                forwarder: None,
            }
        }

        pub fn failing_open(log: OutputLog) -> Self {
            Self {
                fail_open: true,
                ..Self::new(log)
            }
        }

        pub fn failing_detach(log: OutputLog) -> Self {
            Self {
                fail_detach: true,
                ..Self::new(log)
            }
        }
    }

    #[async_trait]
    impl AudioOutput for RecordingOutput {
        async fn open(&mut self, _format: PlaybackFormat) -> Result<(), AudioError> {
            if self.fail_open {
                return Err(AudioError::NoOutputDevice);
            }
            self.log.push("open");
            Ok(())
        }

        fn attach(&mut self) -> Result<PlaybackSink, AudioError> {
            let (sink, mut rx) = PlaybackSink::channel();
            let frames = Arc::clone(&self.log.frames);
            self.forwarder = Some(tokio::spawn(async move {
                while let Some(samples) = rx.recv().await {
                    frames.lock().push(samples);
                }
            }));
            self.log.push("attach");
            Ok(sink)
        }

        fn detach(&mut self) -> Result<(), AudioError> {
            self.log.push("detach");
            if let Some(forwarder) = self.forwarder.take() {
                forwarder.abort();
            }
            if self.fail_detach {
                return Err(AudioError::NotAttached);
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), AudioError> {
            self.log.push("close");
            Ok(())
        }
    }
}
