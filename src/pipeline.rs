//! Pipeline orchestration
//!
//! Wires a source into the ring and the ring into the FFT engine:
//! source -> ring -> analysis thread -> spectrum callback. The producer
//! side never blocks or allocates; the analysis thread drains the ring,
//! feeds the engine, and invokes the registered callback per spectrum.
//!
//! State machine: `Idle -> Running -> Stopping -> Idle`. Invalid
//! transitions are rejected synchronously and never disturb a running
//! pipeline. Stop takes effect at frame boundaries: buffered samples are
//! drained (bounded by one ring capacity) before the thread exits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::analysis::{FftEngine, Spectrum};
use crate::audio::{
    sample_ring, DecodeError, DeviceError, FileInput, LiveInput, RingMonitor, SampleConsumer,
    SourceSpec, SourceState, SourceStateCell,
};
use crate::config::{AnalyzerConfig, ConfigError};

/// Callback invoked on the analysis thread for every emitted spectrum.
pub type SpectrumCallback = Box<dyn FnMut(Spectrum) + Send + 'static>;

/// Pipeline lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Stopping,
}

/// Control-plane errors. Producer-side conditions (overflow, underflow)
/// are diagnostics, not errors; see [`Diagnostics`].
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("state conflict: pipeline is {0:?}")]
    StateConflict(PipelineState),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Counter snapshot surfaced to the consumer side.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub overflows: u64,
    pub underflows: u64,
    pub samples_written: u64,
    pub samples_read: u64,
    pub spectra_emitted: u64,
    /// `None` before the first start.
    pub source_state: Option<SourceState>,
}

enum ActiveSource {
    Live(LiveInput),
    File(FileInput),
}

impl ActiveSource {
    fn sample_rate(&self) -> u32 {
        match self {
            ActiveSource::Live(live) => live.sample_rate(),
            ActiveSource::File(file) => file.info().sample_rate,
        }
    }

    fn shutdown(self) {
        match self {
            // Dropping the stream closes the device callback
            ActiveSource::Live(live) => drop(live),
            ActiveSource::File(mut file) => file.stop(),
        }
    }
}

/// Owns the source, the ring, and the analysis thread.
pub struct Pipeline {
    config: AnalyzerConfig,
    source_spec: SourceSpec,
    state: PipelineState,
    callback: Arc<Mutex<Option<SpectrumCallback>>>,

    active: Option<ActiveSource>,
    consumer: Option<thread::JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
    consumer_done: Arc<AtomicBool>,
    source_state: Option<Arc<SourceStateCell>>,
    spectra_emitted: Arc<AtomicU64>,
    monitor: Option<RingMonitor>,
    last_diagnostics: Diagnostics,
}

impl Pipeline {
    /// Validate the configuration and build an idle pipeline.
    pub fn new(config: AnalyzerConfig, source: SourceSpec) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            source_spec: source,
            state: PipelineState::Idle,
            callback: Arc::new(Mutex::new(None)),
            active: None,
            consumer: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            consumer_done: Arc::new(AtomicBool::new(false)),
            source_state: None,
            spectra_emitted: Arc::new(AtomicU64::new(0)),
            monitor: None,
            last_diagnostics: Diagnostics::default(),
        })
    }

    /// Register the spectrum consumer. May be called again between runs;
    /// spectra emitted with no callback registered are counted and
    /// dropped.
    pub fn on_spectrum<F>(&mut self, callback: F)
    where
        F: FnMut(Spectrum) + Send + 'static,
    {
        *self.callback.lock().unwrap() = Some(Box::new(callback));
    }

    /// Transition Idle -> Running: open the source, arm the analysis
    /// thread. Any other state is a conflict and leaves the pipeline
    /// untouched.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.state != PipelineState::Idle {
            return Err(PipelineError::StateConflict(self.state));
        }

        let (producer, ring_consumer, monitor) = sample_ring(self.config.ring_capacity());
        let source_state = Arc::new(SourceStateCell::new());

        let active = match &self.source_spec {
            SourceSpec::Live { device } => ActiveSource::Live(LiveInput::start(
                device.as_deref(),
                self.config.sample_rate,
                self.config.channels,
                producer,
                Arc::clone(&source_state),
            )?),
            SourceSpec::File { path } => ActiveSource::File(FileInput::start(
                path,
                self.config.channels,
                self.config.pacing,
                producer,
                Arc::clone(&source_state),
            )?),
        };

        let sample_rate = active.sample_rate();
        if sample_rate != self.config.sample_rate {
            log::info!("Analyzing at source rate {} Hz", sample_rate);
        }

        let engine = FftEngine::new(
            self.config.frame_size,
            self.config.hop_size,
            self.config.window,
            sample_rate,
        );

        // Fresh control state per run
        self.stop_flag = Arc::new(AtomicBool::new(false));
        self.consumer_done = Arc::new(AtomicBool::new(false));
        self.spectra_emitted = Arc::new(AtomicU64::new(0));

        // Wake often enough to keep up with the hop rate without spinning
        let poll_us =
            (self.config.hop_size as u64 * 1_000_000 / sample_rate as u64 / 2).clamp(500, 10_000);

        let thread_ctx = ConsumerContext {
            ring: ring_consumer,
            engine,
            callback: Arc::clone(&self.callback),
            stop_flag: Arc::clone(&self.stop_flag),
            done: Arc::clone(&self.consumer_done),
            source_state: Arc::clone(&source_state),
            spectra_emitted: Arc::clone(&self.spectra_emitted),
            drain_budget: self.config.ring_capacity(),
            poll: Duration::from_micros(poll_us),
        };

        let handle = thread::Builder::new()
            .name("analysis".to_string())
            .spawn(move || consumer_loop(thread_ctx))
            .expect("failed to spawn analysis thread");

        self.active = Some(active);
        self.consumer = Some(handle);
        self.source_state = Some(source_state);
        self.monitor = Some(monitor);
        self.state = PipelineState::Running;
        log::info!("Pipeline running");

        Ok(())
    }

    /// Transition Running -> Stopping -> Idle: stop the source, drain
    /// what is already buffered (bounded), join the analysis thread, and
    /// release the ring.
    pub fn stop(&mut self) -> Result<(), PipelineError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::StateConflict(self.state));
        }
        self.state = PipelineState::Stopping;

        if let Some(source) = self.active.take() {
            source.shutdown();
        }
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.consumer.take() {
            let _ = handle.join();
        }

        self.last_diagnostics = self.diagnostics();
        self.monitor = None;
        self.state = PipelineState::Idle;
        log::info!("Pipeline stopped");

        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Terminal state of the current (or last) source.
    pub fn source_state(&self) -> Option<SourceState> {
        self.source_state.as_ref().map(|cell| cell.get())
    }

    /// True once the source hit end of input and the analysis thread has
    /// drained everything that was buffered.
    pub fn is_finished(&self) -> bool {
        self.consumer_done.load(Ordering::Acquire)
            && self.source_state() == Some(SourceState::Finished)
    }

    /// Live counter snapshot while running, last run's snapshot when
    /// idle.
    pub fn diagnostics(&self) -> Diagnostics {
        match &self.monitor {
            Some(monitor) => Diagnostics {
                overflows: monitor.overflows(),
                underflows: monitor.underflows(),
                samples_written: monitor.samples_written(),
                samples_read: monitor.samples_read(),
                spectra_emitted: self.spectra_emitted.load(Ordering::Relaxed),
                source_state: self.source_state(),
            },
            None => self.last_diagnostics.clone(),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.state == PipelineState::Running {
            let _ = self.stop();
        }
    }
}

struct ConsumerContext {
    ring: SampleConsumer,
    engine: FftEngine,
    callback: Arc<Mutex<Option<SpectrumCallback>>>,
    stop_flag: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    source_state: Arc<SourceStateCell>,
    spectra_emitted: Arc<AtomicU64>,
    drain_budget: usize,
    poll: Duration,
}

fn consumer_loop(ctx: ConsumerContext) {
    let ConsumerContext {
        mut ring,
        mut engine,
        callback,
        stop_flag,
        done,
        source_state,
        spectra_emitted,
        drain_budget,
        poll,
    } = ctx;

    let mut chunk = vec![0.0f32; engine.frame_size()];
    let mut drained_while_stopping = 0usize;

    loop {
        let stopping = stop_flag.load(Ordering::Acquire);
        let n = ring.read(&mut chunk);

        if n > 0 {
            engine.feed(&chunk[..n], |spectrum| {
                spectra_emitted.fetch_add(1, Ordering::Relaxed);
                if let Some(cb) = callback.lock().unwrap().as_mut() {
                    cb(spectrum);
                }
            });

            if stopping {
                drained_while_stopping += n;
                if drained_while_stopping >= drain_budget {
                    let left = ring.available();
                    if left > 0 {
                        log::warn!(
                            "Stop drain budget exhausted, discarding {} samples",
                            left
                        );
                    }
                    break;
                }
            }
            continue;
        }

        if stopping {
            break;
        }

        match source_state.get() {
            SourceState::Producing => thread::sleep(poll),
            // Source terminal and the ring is empty: nothing left to do
            SourceState::Finished | SourceState::Failed => break,
        }
    }

    done.store(true, Ordering::Release);
    log::info!("Analysis thread finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file_pipeline(path: &str) -> Pipeline {
        Pipeline::new(
            AnalyzerConfig::default(),
            SourceSpec::File {
                path: PathBuf::from(path),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = AnalyzerConfig {
            frame_size: 1000,
            ..Default::default()
        };
        let result = Pipeline::new(
            config,
            SourceSpec::File {
                path: PathBuf::from("unused.wav"),
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_stop_when_idle_is_state_conflict() {
        let mut pipeline = file_pipeline("unused.wav");
        assert!(matches!(
            pipeline.stop(),
            Err(PipelineError::StateConflict(PipelineState::Idle))
        ));
    }

    #[test]
    fn test_start_with_missing_file_stays_idle() {
        let mut pipeline = file_pipeline("/nonexistent/audio.wav");
        assert!(matches!(
            pipeline.start(),
            Err(PipelineError::Decode(DecodeError::Io(_)))
        ));
        assert_eq!(pipeline.state(), PipelineState::Idle);

        // A failed start leaves the pipeline startable; the next attempt
        // fails the same way rather than conflicting.
        assert!(matches!(
            pipeline.start(),
            Err(PipelineError::Decode(DecodeError::Io(_)))
        ));
    }

    #[test]
    fn test_diagnostics_empty_before_first_start() {
        let pipeline = file_pipeline("unused.wav");
        let diag = pipeline.diagnostics();
        assert_eq!(diag.samples_written, 0);
        assert_eq!(diag.spectra_emitted, 0);
        assert!(diag.source_state.is_none());
    }
}
