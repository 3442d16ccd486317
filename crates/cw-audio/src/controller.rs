//! Stream session lifecycle
//!
//! [`StreamController`] owns the noise-reduction strength, the selected output
//! endpoint and at most one running session. A session lives on a dedicated
//! `cw-stream` thread that opens the transport (cpal streams are not `Send`),
//! then waits on the stop flag and the transport's fault channel.
//!
//! ```text
//! Idle ──start──▶ Starting ──playing──▶ Running ──stop──▶ Stopping ──▶ Idle
//!                    │                     │
//!                    └──────error──────────┴──▶ Failed ──stop──▶ Idle
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};

use cw_core::{AudioBlock, NoiseReduction};
use cw_dsp::{BlockPipeline, BlockStatus, PipelineConfig};

use crate::{
    AudioError, AudioResult, BlockCallback, EndpointDirectory, FaultCallback, SessionConfig,
    StreamParams, Transport, resolve_input, resolve_output,
};

/// Failure notifications kept for a slow reader
const FAILURE_BACKLOG: usize = 64;

/// Transport faults buffered between polls
const FAULT_BACKLOG: usize = 16;

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// Description of the running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub input: String,
    pub output: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub block_size: usize,
}

/// Counters of the current (or last) session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub blocks_processed: u64,
    pub blocks_bypassed: u64,
    pub underruns: u64,
}

#[derive(Debug, Default)]
struct StreamCounters {
    processed: AtomicU64,
    bypassed: AtomicU64,
    underruns: AtomicU64,
}

impl StreamCounters {
    fn reset(&self) {
        self.processed.store(0, Ordering::Relaxed);
        self.bypassed.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StreamStats {
        StreamStats {
            blocks_processed: self.processed.load(Ordering::Relaxed),
            blocks_bypassed: self.bypassed.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }
}

/// State shared with the session thread
struct Shared {
    state: RwLock<StreamState>,
    last_error: RwLock<Option<String>>,
    session: RwLock<Option<SessionInfo>>,
    /// Cleared by `stop()`; the session thread exits when it sees `false`
    running: AtomicBool,
    counters: StreamCounters,
    failure_tx: Sender<String>,
}

impl Shared {
    fn state(&self) -> StreamState {
        *self.state.read()
    }

    fn set_state(&self, state: StreamState) {
        *self.state.write() = state;
    }

    fn fail(&self, err: &AudioError) {
        let message = err.to_string();
        log::error!("Stream failed: {}", message);

        self.running.store(false, Ordering::Release);
        *self.session.write() = None;
        *self.last_error.write() = Some(message.clone());
        self.set_state(StreamState::Failed);

        // A full backlog drops the newest notification; last_error still has it
        let _ = self.failure_tx.try_send(message);
    }
}

/// Owns the noise-reduction strength and the lifecycle of one stream session
pub struct StreamController {
    config: SessionConfig,
    directory: Arc<dyn EndpointDirectory>,
    transport: Arc<dyn Transport>,
    strength: Arc<NoiseReduction>,
    output_endpoint: RwLock<Option<usize>>,
    shared: Arc<Shared>,
    /// Session thread; the lock also serializes start/stop
    worker: Mutex<Option<JoinHandle<()>>>,
    failure_rx: Receiver<String>,
}

impl StreamController {
    /// Create an idle controller. Fails if `config` does not validate.
    pub fn new(
        config: SessionConfig,
        directory: Arc<dyn EndpointDirectory>,
        transport: Arc<dyn Transport>,
    ) -> AudioResult<Self> {
        config.validate()?;

        let (failure_tx, failure_rx) = crossbeam_channel::bounded(FAILURE_BACKLOG);

        Ok(Self {
            strength: NoiseReduction::shared(config.default_strength),
            config,
            directory,
            transport,
            output_endpoint: RwLock::new(None),
            shared: Arc::new(Shared {
                state: RwLock::new(StreamState::Idle),
                last_error: RwLock::new(None),
                session: RwLock::new(None),
                running: AtomicBool::new(false),
                counters: StreamCounters::default(),
                failure_tx,
            }),
            worker: Mutex::new(None),
            failure_rx,
        })
    }

    /// Controller on the platform's cpal host
    pub fn with_cpal(config: SessionConfig) -> AudioResult<Self> {
        Self::new(
            config,
            Arc::new(crate::CpalDirectory::new()),
            Arc::new(crate::CpalTransport::new()),
        )
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PARAMETERS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Select the output endpoint by directory index. Applies to the next session.
    pub fn set_output_endpoint(&self, index: Option<usize>) {
        *self.output_endpoint.write() = index;
    }

    pub fn output_endpoint(&self) -> Option<usize> {
        *self.output_endpoint.read()
    }

    /// Set strength in [0, 1]; takes effect from the next block
    pub fn set_strength(&self, value: f32) {
        self.strength.set(value);
    }

    /// Set strength on the 0-100 scale
    pub fn set_strength_percent(&self, percent: f32) {
        self.strength.set_percent(percent);
    }

    pub fn strength(&self) -> f32 {
        self.strength.get()
    }

    /// Handle read once per block by the pipeline
    pub fn strength_handle(&self) -> Arc<NoiseReduction> {
        Arc::clone(&self.strength)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STATUS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == StreamState::Running
    }

    /// Endpoints and shape of the running session
    pub fn session(&self) -> Option<SessionInfo> {
        self.shared.session.read().clone()
    }

    /// Message of the failure that put the controller in `Failed`
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.read().clone()
    }

    /// Human-readable failure notifications, one per failed session
    pub fn failures(&self) -> Receiver<String> {
        self.failure_rx.clone()
    }

    pub fn stats(&self) -> StreamStats {
        self.shared.counters.snapshot()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Start a session. No-op while one is starting or running; an error while
    /// `Failed` (call [`stop`](Self::stop) first).
    pub fn start(&self) -> AudioResult<()> {
        let mut worker = self.worker.lock();

        match self.shared.state() {
            StreamState::Starting | StreamState::Running => return Ok(()),
            StreamState::Failed => {
                return Err(AudioError::SessionFailed(
                    self.last_error().unwrap_or_else(|| "unknown error".to_string()),
                ));
            }
            StreamState::Idle | StreamState::Stopping => {}
        }

        if let Some(handle) = worker.take() {
            join_worker(handle);
        }

        let params = match self.resolve_params() {
            Ok(params) => params,
            Err(err) => {
                self.shared.fail(&err);
                return Err(err);
            }
        };

        log::info!("Using input device: {}", params.input.name);
        log::info!("Using output device: {}", params.output.name);
        log::info!(
            "Channels: {}, {} Hz, block {} frames ({:.1} ms)",
            params.channels,
            params.sample_rate,
            params.block_size,
            params.block_duration().as_secs_f64() * 1000.0
        );

        self.shared.set_state(StreamState::Starting);
        self.shared.counters.reset();
        *self.shared.last_error.write() = None;
        self.shared.running.store(true, Ordering::Release);

        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let session = Session {
            shared: Arc::clone(&self.shared),
            transport: Arc::clone(&self.transport),
            strength: Arc::clone(&self.strength),
            pipeline: self.config.pipeline,
            poll: self.config.poll_interval().min(params.block_duration()),
            params,
        };

        let handle = match thread::Builder::new()
            .name("cw-stream".into())
            .spawn(move || session.run(ready_tx))
        {
            Ok(handle) => handle,
            Err(e) => {
                let err = AudioError::ThreadSpawn(e.to_string());
                self.shared.fail(&err);
                return Err(err);
            }
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *worker = Some(handle);
                log::info!("Stream started");
                Ok(())
            }
            Ok(Err(err)) => {
                join_worker(handle);
                self.shared.fail(&err);
                Err(err)
            }
            Err(_) => {
                join_worker(handle);
                let err = AudioError::StreamError("stream thread exited during startup".into());
                self.shared.fail(&err);
                Err(err)
            }
        }
    }

    /// Stop the session and release the transport. Also acknowledges a failure.
    /// Safe to call from any thread; no-op while idle.
    pub fn stop(&self) -> AudioResult<()> {
        let mut worker = self.worker.lock();

        match self.shared.state() {
            StreamState::Idle => return Ok(()),
            StreamState::Failed => {
                if let Some(handle) = worker.take() {
                    join_worker(handle);
                }
                *self.shared.last_error.write() = None;
                self.shared.set_state(StreamState::Idle);
                log::info!("Failure acknowledged");
                return Ok(());
            }
            StreamState::Starting | StreamState::Running | StreamState::Stopping => {}
        }

        self.shared.set_state(StreamState::Stopping);
        self.shared.running.store(false, Ordering::Release);

        if let Some(handle) = worker.take() {
            join_worker(handle);
        }

        *self.shared.session.write() = None;
        *self.shared.last_error.write() = None;
        self.shared.set_state(StreamState::Idle);

        log::info!("Stream stopped");
        Ok(())
    }

    fn resolve_params(&self) -> AudioResult<StreamParams> {
        let output_index = self.output_endpoint().ok_or(AudioError::NoOutputSelected)?;
        let endpoints = self.directory.endpoints()?;

        let input = resolve_input(&endpoints, self.config.input_name_patterns.as_slice())?.clone();
        let output = resolve_output(&endpoints, output_index)?.clone();

        let channels = input.max_input_channels.min(output.max_output_channels);

        Ok(StreamParams {
            input,
            output,
            channels,
            sample_rate: self.config.sample_rate,
            block_size: self.config.block_size,
        })
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl std::fmt::Debug for StreamController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamController")
            .field("state", &self.state())
            .field("strength", &self.strength())
            .field("output_endpoint", &self.output_endpoint())
            .field("session", &self.session())
            .finish()
    }
}

fn join_worker(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        log::error!("Stream thread panicked");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SESSION THREAD
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything the session thread owns
struct Session {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    strength: Arc<NoiseReduction>,
    pipeline: PipelineConfig,
    params: StreamParams,
    poll: Duration,
}

impl Session {
    fn run(self, ready: Sender<AudioResult<()>>) {
        let (fault_tx, fault_rx) = crossbeam_channel::bounded::<AudioError>(FAULT_BACKLOG);

        let mut pipeline = match BlockPipeline::new(self.pipeline) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                let _ = ready.send(Err(e.into()));
                return;
            }
        };
        if let Err(e) = pipeline.prepare(self.params.block_size, self.params.channels as usize) {
            let _ = ready.send(Err(e.into()));
            return;
        }
        let faults = pipeline.faults();

        let shared = Arc::clone(&self.shared);
        let strength = Arc::clone(&self.strength);
        let callback: BlockCallback = Box::new(move |input: &AudioBlock, output: &mut AudioBlock| {
            match pipeline.process(input, strength.get(), output) {
                BlockStatus::Processed { .. } => {
                    shared.counters.processed.fetch_add(1, Ordering::Relaxed);
                }
                BlockStatus::Bypassed => {
                    shared.counters.bypassed.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        let fault_sender = fault_tx.clone();
        let on_fault: FaultCallback = Arc::new(move |err: AudioError| {
            let _ = fault_sender.try_send(err);
        });

        let mut stream = match self.transport.open(&self.params, callback, on_fault) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        if let Err(e) = stream.play() {
            drop(stream);
            let _ = ready.send(Err(e));
            return;
        }

        *self.shared.session.write() = Some(SessionInfo {
            input: self.params.input.name.clone(),
            output: self.params.output.name.clone(),
            channels: self.params.channels,
            sample_rate: self.params.sample_rate,
            block_size: self.params.block_size,
        });
        self.shared.set_state(StreamState::Running);
        let _ = ready.send(Ok(()));

        let mut seen_faults = 0;
        let fault = loop {
            if !self.shared.running.load(Ordering::Acquire) {
                break None;
            }

            match fault_rx.recv_timeout(self.poll) {
                Ok(err) => break Some(err),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => thread::sleep(self.poll),
            }

            if let Some((new, kind)) = faults.since(&mut seen_faults) {
                log::warn!(
                    "{} block(s) passed through unprocessed (last: {}), {} total",
                    new,
                    kind,
                    seen_faults
                );
            }

            self.shared
                .counters
                .underruns
                .store(stream.underruns(), Ordering::Relaxed);
        };

        if let Err(e) = stream.pause() {
            log::warn!("Failed to pause stream: {}", e);
        }
        self.shared
            .counters
            .underruns
            .store(stream.underruns(), Ordering::Relaxed);
        // Releases the transport and the pipeline's previous-block state
        drop(stream);
        drop(fault_tx);

        let stats = self.shared.counters.snapshot();
        log::debug!(
            "Session ended: {} processed, {} bypassed, {} underruns",
            stats.blocks_processed,
            stats.blocks_bypassed,
            stats.underruns
        );

        if let Some(err) = fault {
            self.shared.fail(&err);
        }
    }
}
