//! Speaker output via cpal.
//!
//! A single continuous output stream runs for the life of the sink; its
//! render callback counts frames, which doubles as the playback clock the
//! scheduler anchors chunk starts against. cpal streams are not `Send`,
//! so the stream lives on a dedicated thread and the sink handle only
//! shares the render state with it.

use crate::audio::scheduler::{EndCallback, OutputSink};
use crate::config::AudioConfig;
use crate::error::{EngineError, Result};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use tracing::{error, info};

struct ScheduledBuffer {
    start_frame: u64,
    samples: Vec<f32>,
    position: usize,
    on_end: Option<EndCallback>,
}

#[derive(Default)]
struct SinkState {
    frames_rendered: u64,
    scheduled: Vec<ScheduledBuffer>,
    gain: f32,
}

/// Playback sink rendering through the system output device.
pub struct CpalSink {
    state: Arc<Mutex<SinkState>>,
    sample_rate: u32,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSink {
    /// Open the output device and start the render stream.
    ///
    /// # Errors
    ///
    /// Returns an error if no matching output device is available or the
    /// stream cannot be built.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let state = Arc::new(Mutex::new(SinkState {
            gain: 1.0,
            ..SinkState::default()
        }));
        let stop = Arc::new(AtomicBool::new(false));
        let sample_rate = config.sample_rate;
        let device_name = config.output_device.clone();

        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let thread_state = Arc::clone(&state);
        let thread_stop = Arc::clone(&stop);

        let thread = std::thread::spawn(move || {
            run_stream(thread_state, thread_stop, sample_rate, device_name, ready_tx);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                state,
                sample_rate,
                stop,
                thread: Some(thread),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::Audio(
                "output thread exited before reporting readiness".into(),
            )),
        }
    }
}

/// Owns the cpal stream for its whole life; runs on the output thread.
fn run_stream(
    state: Arc<Mutex<SinkState>>,
    stop: Arc<AtomicBool>,
    sample_rate: u32,
    device_name: Option<String>,
    ready_tx: mpsc::Sender<Result<()>>,
) {
    let stream = match build_stream(&state, sample_rate, device_name) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(EngineError::Audio(format!(
            "failed to start output stream: {e}"
        ))));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
    drop(stream);
}

fn build_stream(
    state: &Arc<Mutex<SinkState>>,
    sample_rate: u32,
    device_name: Option<String>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = if let Some(ref name) = device_name {
        host.output_devices()
            .map_err(|e| EngineError::Audio(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| EngineError::Audio(format!("output device '{name}' not found")))?
    } else {
        host.default_output_device()
            .ok_or_else(|| EngineError::Audio("no default output device".into()))?
    };

    let desc = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using output device: {desc}");

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let render_state = Arc::clone(state);
    device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                render(&render_state, data);
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| EngineError::Audio(format!("failed to build output stream: {e}")))
}

/// Fill one output period, mixing every scheduled buffer that overlaps it.
fn render(state: &Arc<Mutex<SinkState>>, data: &mut [f32]) {
    let mut finished = Vec::new();
    {
        let mut state = match state.lock() {
            Ok(s) => s,
            Err(_) => return,
        };

        for sample in data.iter_mut() {
            let frame = state.frames_rendered;
            let gain = state.gain;
            let mut mixed = 0.0f32;
            for buffer in state.scheduled.iter_mut() {
                if frame >= buffer.start_frame && buffer.position < buffer.samples.len() {
                    mixed += buffer.samples[buffer.position];
                    buffer.position += 1;
                }
            }
            *sample = mixed * gain;
            state.frames_rendered += 1;
        }

        let mut i = 0;
        while i < state.scheduled.len() {
            if state.scheduled[i].position >= state.scheduled[i].samples.len() {
                let mut buffer = state.scheduled.swap_remove(i);
                if let Some(cb) = buffer.on_end.take() {
                    finished.push(cb);
                }
            } else {
                i += 1;
            }
        }
    }
    // Callbacks run outside the lock; they cross into the engine via a
    // channel and must not re-enter the render state.
    for cb in finished {
        cb();
    }
}

impl OutputSink for CpalSink {
    fn now(&self) -> f64 {
        match self.state.lock() {
            Ok(state) => state.frames_rendered as f64 / self.sample_rate as f64,
            Err(_) => 0.0,
        }
    }

    fn schedule(&mut self, samples: Vec<f32>, start_at: f64, on_end: EndCallback) -> Result<()> {
        let start_frame = (start_at * self.sample_rate as f64).round() as u64;
        let mut state = self
            .state
            .lock()
            .map_err(|_| EngineError::Audio("render state poisoned".into()))?;
        state.scheduled.push(ScheduledBuffer {
            start_frame,
            samples,
            position: 0,
            on_end: Some(on_end),
        });
        Ok(())
    }

    fn clear(&mut self) {
        let drained = match self.state.lock() {
            Ok(mut state) => state.scheduled.drain(..).collect::<Vec<_>>(),
            Err(_) => return,
        };
        for mut buffer in drained {
            if let Some(cb) = buffer.on_end.take() {
                cb();
            }
        }
    }

    fn set_gain(&mut self, gain: f32) {
        if let Ok(mut state) = self.state.lock() {
            state.gain = gain.clamp(0.0, 1.0);
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
