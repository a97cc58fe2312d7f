use std::{
    fmt::{Display, Formatter},
    ops::ControlFlow,
};

use tokio_util::sync::CancellationToken;

use crate::{error::PipelineError, planar::PlanarBuffer, rational::Rational};

/// A planar image plus the timing the renderer needs to present it.
#[derive(Clone, Debug)]
pub struct TimedFrame {
    pub buffer: PlanarBuffer,
    /// Seconds since the first frame of the run.
    pub pts: Rational,
    /// Always `None`: frames arrive in presentation order.
    pub dts: Option<Rational>,
    pub duration: Rational,
    /// Zero-based index within the run.
    pub sequence: u64,
}

impl Display for TimedFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "#{} pts={} dur={} {}x{} {}",
            self.sequence,
            self.pts,
            self.duration,
            self.buffer.width(),
            self.buffer.height(),
            self.buffer.layout()
        )
    }
}

/// How a run ended. Exactly one is produced per run.
#[derive(Debug)]
pub enum RunOutcome {
    /// The channel ran dry. `discarded` bytes of a trailing partial frame were dropped.
    EndOfStream { frames: u64, discarded: usize },
    /// `stop()` was called.
    Stopped { frames: u64, discarded: usize },
    /// The consumer asked to be detached.
    ConsumerDetached { frames: u64 },
    Failed { frames: u64, error: PipelineError },
}

impl RunOutcome {
    pub fn frames(&self) -> u64 {
        match self {
            RunOutcome::EndOfStream { frames, .. }
            | RunOutcome::Stopped { frames, .. }
            | RunOutcome::ConsumerDetached { frames }
            | RunOutcome::Failed { frames, .. } => *frames,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::Failed { .. })
    }
}

impl Display for RunOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            RunOutcome::EndOfStream { frames, discarded } => {
                write!(f, "end of stream after {} frames", frames)?;
                if *discarded > 0 {
                    write!(f, " ({} trailing bytes dropped)", discarded)?;
                }
                Ok(())
            }
            RunOutcome::Stopped { frames, .. } => write!(f, "stopped after {} frames", frames),
            RunOutcome::ConsumerDetached { frames } => {
                write!(f, "consumer detached after {} frames", frames)
            }
            RunOutcome::Failed { frames, error } => {
                write!(f, "failed after {} frames: {}", frames, error)
            }
        }
    }
}

/// Receives the frames of one run, in order, on the pipeline worker thread.
///
/// `on_frame` may block: the next read only starts once it returns, which is
/// how a slow consumer paces the pipeline. `stop()` also waits for it, so a
/// consumer that blocks should watch the token handed to `on_start` and give
/// up by returning `ControlFlow::Break(())` once it fires.
pub trait FrameConsumer: Send + 'static {
    /// Called on the worker thread before the first read. `stop` is cancelled
    /// when the run is asked to stop.
    fn on_start(&mut self, _stop: &CancellationToken) {}

    /// Return `ControlFlow::Break(())` to end the run.
    fn on_frame(&mut self, frame: TimedFrame) -> ControlFlow<()>;

    /// Called once after the last frame.
    fn on_finish(&mut self, _outcome: &RunOutcome) {}
}

impl<F> FrameConsumer for F
where
    F: FnMut(TimedFrame) + Send + 'static,
{
    fn on_frame(&mut self, frame: TimedFrame) -> ControlFlow<()> {
        self(frame);
        ControlFlow::Continue(())
    }
}
