//! Turns a raw planar video byte stream, as written by `ffmpeg -f rawvideo`,
//! into presentation-timed frames.
//!
//! ```text
//! ByteChannel -> Deframer -> PlanarBuffer -> PresentationClock -> TimedFrame -> FrameConsumer
//! ```
//!
//! [`pipeline::Pipeline`] owns the lifecycle; everything else is usable on its own.

pub mod channel;
pub mod clock;
pub mod deframer;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod pipeline;
pub mod planar;
pub mod rational;
pub mod sink;

#[cfg(test)]
mod testing;

pub use channel::{ByteChannel, ChannelId};
pub use error::{BufferError, ChannelError, GeometryError, PipelineError};
pub use frame::{FrameConsumer, RunOutcome, TimedFrame};
pub use geometry::{PixelLayout, StreamGeometry};
pub use pipeline::{Pipeline, PipelineConfig, PipelineState, PipelineStats};
pub use planar::{PlanarBuffer, Plane};
pub use rational::Rational;
pub use sink::{FrameSink, FrameStream};
