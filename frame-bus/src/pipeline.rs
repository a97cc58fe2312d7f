use std::{
    ops::ControlFlow,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{runtime::Handle, sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    channel::{ByteChannel, ChannelId},
    clock::PresentationClock,
    deframer::{Deframed, Deframer},
    error::{BufferError, PipelineError},
    frame::{FrameConsumer, RunOutcome, TimedFrame},
    geometry::StreamGeometry,
    planar::PlanarBuffer,
    rational::Rational,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub geometry: StreamGeometry,
    /// Frames per second, e.g. `"30"` or `"30000/1001"`.
    pub frame_rate: Rational,
    pub channel: ChannelId,
    /// Delay before retrying a read that found nothing to read.
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
    /// Row alignment of the produced planes, in bytes.
    #[serde(default = "default_stride_align")]
    pub stride_align: usize,
}

fn default_idle_backoff_ms() -> u64 {
    20
}

fn default_stride_align() -> usize {
    1
}

impl PipelineConfig {
    pub fn new(geometry: StreamGeometry, frame_rate: Rational, channel: ChannelId) -> Self {
        Self {
            geometry,
            frame_rate,
            channel,
            idle_backoff_ms: default_idle_backoff_ms(),
            stride_align: default_stride_align(),
        }
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl PipelineState {
    pub fn is_active(&self) -> bool {
        matches!(self, PipelineState::Running | PipelineState::Stopping)
    }
}

/// Counters of the current run, or of the last one once it has ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub bytes: u64,
    pub idle_retries: u64,
    pub discarded: u64,
}

#[derive(Default)]
struct StatCells {
    frames: AtomicU64,
    bytes: AtomicU64,
    idle_retries: AtomicU64,
    discarded: AtomicU64,
}

impl StatCells {
    fn reset(&self) {
        for cell in [&self.frames, &self.bytes, &self.idle_retries, &self.discarded] {
            cell.store(0, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames: self.frames.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            idle_retries: self.idle_retries.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    state: watch::Sender<PipelineState>,
    stats: StatCells,
}

struct Run {
    generation: u64,
    cancel: CancellationToken,
    /// Fires once the worker has set `Stopped`.
    done: CancellationToken,
    handle: JoinHandle<RunOutcome>,
}

/// Drives one byte channel into a [`FrameConsumer`], one run at a time.
///
/// ```text
/// Idle --start--> Running --stop--> Stopping --worker exit--> Stopped
///                    |                                          ^
///                    +------ end of stream / detach / error ----+
/// ```
///
/// `Stopped` accepts `start` again; every run gets a fresh clock, channel and
/// accumulation buffer.
pub struct Pipeline {
    config: PipelineConfig,
    shared: Arc<Shared>,
    run: tokio::sync::Mutex<Option<Run>>,
    generation: AtomicU64,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        if PresentationClock::new(config.frame_rate).is_none() {
            return Err(PipelineError::InvalidFrameRate(config.frame_rate));
        }
        Ok(Self {
            config,
            shared: Arc::new(Shared {
                state: watch::Sender::new(PipelineState::Idle),
                stats: StatCells::default(),
            }),
            run: tokio::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        *self.shared.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.shared.state.subscribe()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats.snapshot()
    }

    /// Opens the configured channel and starts delivering frames to `consumer`.
    ///
    /// While a run is active this returns [`PipelineError::AlreadyRunning`] and
    /// drops `consumer` unused. A channel that cannot be opened leaves the
    /// state untouched.
    pub async fn start<C: FrameConsumer>(&self, consumer: C) -> Result<(), PipelineError> {
        let mut run = self.run.lock().await;
        self.ensure_startable()?;
        let channel = ByteChannel::open(&self.config.channel).await?;
        self.launch(&mut run, channel, Box::new(consumer)).await
    }

    /// Like [`Pipeline::start`], reading from an already opened channel.
    pub async fn start_with_channel<C: FrameConsumer>(
        &self,
        channel: ByteChannel,
        consumer: C,
    ) -> Result<(), PipelineError> {
        let mut run = self.run.lock().await;
        self.ensure_startable()?;
        self.launch(&mut run, channel, Box::new(consumer)).await
    }

    /// Ends the current run and waits for its worker. Once this returns, the
    /// old run delivers no more frames.
    ///
    /// A consumer blocked inside `on_frame` delays this until it returns.
    pub async fn stop(&self) -> Result<RunOutcome, PipelineError> {
        let mut run = self.run.lock().await;
        if run.is_none() {
            return Err(PipelineError::NotRunning);
        }
        let stopping = self.shared.state.send_if_modified(|state| {
            if *state == PipelineState::Running {
                *state = PipelineState::Stopping;
                true
            } else {
                false
            }
        });
        if !stopping {
            return Err(PipelineError::NotRunning);
        }
        let Some(current) = run.take() else {
            return Err(PipelineError::NotRunning);
        };

        log::info!("pipeline: stopping");
        current.cancel.cancel();
        Ok(self.join(current.handle).await)
    }

    /// Waits for the current run to end on its own and returns how it ended.
    ///
    /// Returns `None` if there is no run to wait for, or if the run was
    /// collected by `stop()` in the meantime. A run started after this call
    /// is never waited for.
    pub async fn wait(&self) -> Option<RunOutcome> {
        let (generation, done) = {
            let run = self.run.lock().await;
            let current = run.as_ref()?;
            (current.generation, current.done.clone())
        };
        done.cancelled().await;

        let mut run = self.run.lock().await;
        if run.as_ref()?.generation != generation {
            return None;
        }
        let current = run.take()?;
        Some(self.join(current.handle).await)
    }

    fn ensure_startable(&self) -> Result<(), PipelineError> {
        if self.state().is_active() {
            log::warn!("pipeline: already started");
            return Err(PipelineError::AlreadyRunning);
        }
        Ok(())
    }

    async fn launch(
        &self,
        run: &mut Option<Run>,
        channel: ByteChannel,
        consumer: Box<dyn FrameConsumer>,
    ) -> Result<(), PipelineError> {
        if let Some(previous) = run.take() {
            let outcome = self.join(previous.handle).await;
            log::debug!("pipeline: reaped previous run, {}", outcome);
        }

        let geometry = self.config.geometry;
        let frame_size = geometry.frame_size();
        let clock = PresentationClock::new(self.config.frame_rate)
            .ok_or(PipelineError::InvalidFrameRate(self.config.frame_rate))?;
        let deframer = Deframer::new(channel, frame_size, self.config.idle_backoff()).map_err(
            |source| BufferError::Allocation {
                bytes: frame_size,
                source,
            },
        )?;

        log::info!(
            "pipeline: starting {} @ {} fps from {}",
            geometry,
            self.config.frame_rate,
            deframer.channel().name()
        );

        self.shared.stats.reset();
        self.shared.state.send_modify(|s| *s = PipelineState::Running);

        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let worker = Worker {
            runtime: Handle::current(),
            cancel: cancel.clone(),
            geometry,
            stride_align: self.config.stride_align,
            clock,
            deframer,
            shared: self.shared.clone(),
        };
        let guard = RunGuard {
            shared: self.shared.clone(),
            done: done.clone(),
        };
        let handle = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            worker.run(consumer)
        });

        *run = Some(Run {
            generation,
            cancel,
            done,
            handle,
        });
        Ok(())
    }

    async fn join(&self, handle: JoinHandle<RunOutcome>) -> RunOutcome {
        let frames = self.shared.stats.frames.load(Ordering::Relaxed);
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                log::error!("pipeline: worker panicked");
                RunOutcome::Failed {
                    frames,
                    error: PipelineError::ConsumerPanicked,
                }
            }
            Err(e) => RunOutcome::Failed {
                frames,
                error: PipelineError::Worker(e.to_string()),
            },
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(run) = self.run.get_mut().take() {
            run.cancel.cancel();
        }
    }
}

/// Moves the state to `Stopped` however the worker exits, including when its
/// task never gets to run.
struct RunGuard {
    shared: Arc<Shared>,
    done: CancellationToken,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.shared
            .state
            .send_modify(|s| *s = PipelineState::Stopped);
        self.done.cancel();
    }
}

struct Worker {
    runtime: Handle,
    cancel: CancellationToken,
    geometry: StreamGeometry,
    stride_align: usize,
    clock: PresentationClock,
    deframer: Deframer,
    shared: Arc<Shared>,
}

impl Worker {
    fn run(mut self, mut consumer: Box<dyn FrameConsumer>) -> RunOutcome {
        consumer.on_start(&self.cancel);
        let (outcome, panicked) = self.deliver(consumer.as_mut());
        self.sync_counters();
        self.deframer.close();
        self.shared
            .stats
            .discarded
            .store(discarded(&outcome) as u64, Ordering::Relaxed);

        if !panicked {
            consumer.on_finish(&outcome);
        }
        drop(consumer);

        match &outcome {
            RunOutcome::Failed { .. } => log::error!("pipeline: {}", outcome),
            _ => log::info!("pipeline: {}", outcome),
        }
        outcome
    }

    fn sync_counters(&self) {
        let counters = self.deframer.counters();
        let stats = &self.shared.stats;
        stats.bytes.store(counters.bytes, Ordering::Relaxed);
        stats
            .idle_retries
            .store(counters.idle_retries, Ordering::Relaxed);
    }

    /// Frame loop. The flag is set when the consumer panicked.
    fn deliver(&mut self, consumer: &mut dyn FrameConsumer) -> (RunOutcome, bool) {
        let stats = &self.shared.stats;
        let mut frames = 0u64;

        loop {
            let next = self.runtime.block_on(self.deframer.next_frame(&self.cancel));
            let chunk = match next {
                Ok(Deframed::Frame(chunk)) => chunk,
                Ok(Deframed::EndOfStream { discarded }) => {
                    return (RunOutcome::EndOfStream { frames, discarded }, false);
                }
                Ok(Deframed::Cancelled { discarded }) => {
                    return (RunOutcome::Stopped { frames, discarded }, false);
                }
                Err(e) => {
                    let error = e.into();
                    return (RunOutcome::Failed { frames, error }, false);
                }
            };

            let buffer = match PlanarBuffer::from_chunk(&self.geometry, chunk, self.stride_align) {
                Ok(buffer) => buffer,
                Err(e) => {
                    let error = e.into();
                    return (RunOutcome::Failed { frames, error }, false);
                }
            };
            self.sync_counters();

            if self.cancel.is_cancelled() {
                return (RunOutcome::Stopped { frames, discarded: 0 }, false);
            }

            let frame = TimedFrame {
                buffer,
                pts: self.clock.next(),
                dts: None,
                duration: self.clock.frame_duration(),
                sequence: frames,
            };
            log::trace!("pipeline: frame {}", frame);

            let flow = std::panic::catch_unwind(AssertUnwindSafe(|| consumer.on_frame(frame)));
            match flow {
                Ok(ControlFlow::Continue(())) => {
                    frames += 1;
                    stats.frames.store(frames, Ordering::Relaxed);
                }
                Ok(ControlFlow::Break(())) if self.cancel.is_cancelled() => {
                    return (RunOutcome::Stopped { frames, discarded: 0 }, false);
                }
                Ok(ControlFlow::Break(())) => {
                    frames += 1;
                    stats.frames.store(frames, Ordering::Relaxed);
                    return (RunOutcome::ConsumerDetached { frames }, false);
                }
                Err(_) => {
                    let error = PipelineError::ConsumerPanicked;
                    return (RunOutcome::Failed { frames, error }, true);
                }
            }
        }
    }
}

fn discarded(outcome: &RunOutcome) -> usize {
    match outcome {
        RunOutcome::EndOfStream { discarded, .. } | RunOutcome::Stopped { discarded, .. } => {
            *discarded
        }
        _ => 0,
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
