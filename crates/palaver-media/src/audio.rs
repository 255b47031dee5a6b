//! Shared audio capture with fan-out.
//!
//! One capture stream per call, many consumers: every outgoing peer
//! connection subscribes to the same [`SharedCapture`], so the microphone
//! is opened exactly once no matter how many peers are in the mesh.  Mute
//! is a flag on the capture and therefore applies to all connections at
//! once, with no renegotiation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::CallError;

#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_size_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            frame_size_ms: 20,
        }
    }
}

impl AudioConfig {
    pub fn frame_size_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_size_ms as usize) / 1000
    }
}

/// Single-writer, multi-reader capture handle.
///
/// Cloning the handle shares the underlying capture; each peer connection
/// calls [`SharedCapture::subscribe`] for its own frame stream.
#[derive(Clone)]
pub struct SharedCapture {
    config: AudioConfig,
    frames: broadcast::Sender<Vec<f32>>,
    muted: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
}

impl SharedCapture {
    pub fn new(config: AudioConfig) -> Self {
        // Small buffer: audio is real-time, laggy subscribers drop frames.
        let (frames, _) = broadcast::channel(32);
        Self {
            config,
            frames,
            muted: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A frame stream for one peer connection.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<f32>> {
        self.frames.subscribe()
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        debug!(muted, "Capture mute state changed");
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Open the default input device and start fanning frames out.
    pub fn start(&self) -> Result<(), CallError> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(CallError::NoInputDevice)?;

        info!(device = ?device.name(), "Using input device");

        let config = cpal::StreamConfig {
            channels: self.config.channels,
            sample_rate: cpal::SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let frame_size = self.config.frame_size_samples();
        let mut buffer = Vec::with_capacity(frame_size);
        let muted = self.muted.clone();
        let active = self.active.clone();
        let frames = self.frames.clone();

        active.store(true, Ordering::SeqCst);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    if !active.load(Ordering::Relaxed) {
                        return;
                    }
                    if muted.load(Ordering::Relaxed) {
                        // Send silence when muted so playback stays in sync
                        buffer.extend(std::iter::repeat(0.0f32).take(data.len()));
                    } else {
                        buffer.extend_from_slice(data);
                    }
                    while buffer.len() >= frame_size {
                        let frame: Vec<f32> = buffer.drain(..frame_size).collect();
                        if frames.send(frame).is_err() {
                            // No subscribers yet; frames are discarded.
                        }
                    }
                },
                move |err| {
                    error!("Audio input error: {err}");
                },
                None,
            )
            .map_err(|e| CallError::StreamError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| CallError::StreamError(e.to_string()))?;

        // Keep stream alive (released via active flag — callback becomes no-op)
        std::mem::forget(stream);

        debug!("Shared capture started");
        Ok(())
    }

    /// Release the capture device.  All subscribers see the stream end.
    pub fn release(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.muted.store(false, Ordering::SeqCst);
        debug!("Shared capture released");
    }
}

/// Play mixed mesh audio on the default output device.
pub fn start_playback(
    config: &AudioConfig,
    mut frame_rx: tokio::sync::mpsc::Receiver<Vec<f32>>,
) -> Result<(), CallError> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(CallError::NoOutputDevice)?;

    info!(device = ?device.name(), "Using output device");

    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let (playback_tx, playback_rx) = std::sync::mpsc::channel::<Vec<f32>>();

    // Bridge tokio channel to std channel for the audio callback
    tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if playback_tx.send(frame).is_err() {
                break;
            }
        }
        warn!("Playback bridge ended");
    });

    let mut play_buffer: VecDeque<f32> = VecDeque::new();

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                while let Ok(frame) = playback_rx.try_recv() {
                    play_buffer.extend(frame.iter());
                }
                for sample in data.iter_mut() {
                    *sample = play_buffer.pop_front().unwrap_or(0.0);
                }
            },
            move |err| {
                error!("Audio output error: {err}");
            },
            None,
        )
        .map_err(|e| CallError::StreamError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CallError::StreamError(e.to_string()))?;

    std::mem::forget(stream);
    debug!("Audio playback started");
    Ok(())
}
