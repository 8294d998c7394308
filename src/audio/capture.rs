//! Microphone capture via cpal.
//!
//! Opens the input device at its native configuration, then converts to
//! mono and downsamples to the transcription rate (default 16kHz) in
//! software before handing chunks to the recording session.

use crate::config::RecordingConfig;
use crate::error::{EngineError, Result};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Microphone capture producing mono samples at the transcription rate.
pub struct MicCapture {
    device: cpal::Device,
    stream_config: StreamConfig,
    target_sample_rate: u32,
}

impl MicCapture {
    /// Open the input device.
    ///
    /// Uses the device's default configuration for compatibility and
    /// converts in software.
    ///
    /// # Errors
    ///
    /// Returns an error if no matching input device is available.
    pub fn new(config: &RecordingConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.input_device {
            host.input_devices()
                .map_err(|e| EngineError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| {
                    EngineError::Permission(format!("input device '{name}' not found"))
                })?
        } else {
            host.default_input_device()
                .ok_or_else(|| EngineError::Permission("no default input device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using input device: {device_name}");

        let default_config = device
            .default_input_config()
            .map_err(|e| EngineError::Audio(format!("no default input config: {e}")))?;

        let stream_config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            stream_config,
            target_sample_rate: config.capture_sample_rate,
        })
    }

    /// Run the capture loop, sending converted chunks on `tx` until the
    /// token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the input stream cannot be created or started.
    pub async fn run(&self, tx: mpsc::Sender<Vec<f32>>, cancel: CancellationToken) -> Result<()> {
        let native_rate = self.stream_config.sample_rate;
        let native_channels = self.stream_config.channels;
        let target_rate = self.target_sample_rate;

        let stream = self
            .device
            .build_input_stream(
                &self.stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let mono = if native_channels > 1 {
                        to_mono(data, native_channels)
                    } else {
                        data.to_vec()
                    };
                    let samples = if native_rate != target_rate {
                        downsample(&mono, native_rate, target_rate)
                    } else {
                        mono
                    };
                    // try_send keeps the audio thread from ever blocking.
                    if tx.try_send(samples).is_err() {
                        debug!("capture channel full, dropping chunk");
                    }
                },
                move |err| {
                    error!("audio input stream error: {err}");
                },
                None,
            )
            .map_err(|e| EngineError::Audio(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| EngineError::Audio(format!("failed to start input stream: {e}")))?;

        info!("capture started: native {native_rate}Hz -> target {target_rate}Hz");

        cancel.cancelled().await;

        drop(stream);
        info!("capture stopped");
        Ok(())
    }
}

/// Fold interleaved frames down to one averaged channel.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let stride = usize::from(channels);
    data.chunks_exact(stride)
        .map(|frame| frame.iter().sum::<f32>() / stride as f32)
        .collect()
}

/// Resample by linear interpolation between neighboring source samples.
/// Speech energy sits well below the target's Nyquist, so no low-pass
/// stage precedes it.
fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let step = f64::from(src_rate) / f64::from(dst_rate);
    let out_len = (samples.len() as f64 / step) as usize;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            match samples.get(idx + 1) {
                Some(&next) => samples[idx] * (1.0 - frac) + next * frac,
                None => samples[idx],
            }
        })
        .collect()
}
