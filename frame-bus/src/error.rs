use std::collections::TryReserveError;

use thiserror::Error;

use crate::geometry::PixelLayout;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid channel id {0:?}")]
    InvalidId(String),
    #[error("channel {id} is not supported on this platform")]
    Unsupported { id: String },
    #[error("failed to open channel {id}")]
    Open {
        id: String,
        #[source]
        source: std::io::Error,
    },
    #[error("channel read failed")]
    Read(#[source] std::io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("frame dimensions must be non-zero, got {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },
    #[error("{layout} needs even dimensions, got {width}x{height}")]
    OddDimension {
        layout: PixelLayout,
        width: u32,
        height: u32,
    },
    #[error("frame size of {width}x{height} overflows usize")]
    TooLarge { width: u32, height: u32 },
}

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("failed to allocate {bytes} bytes of plane memory")]
    Allocation {
        bytes: usize,
        #[source]
        source: TryReserveError,
    },
    #[error("raw chunk is {actual} bytes, frame needs {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("frame rate must be positive, got {0}")]
    InvalidFrameRate(crate::rational::Rational),
    #[error("pipeline is already running")]
    AlreadyRunning,
    #[error("pipeline is not running")]
    NotRunning,
    #[error("frame consumer panicked")]
    ConsumerPanicked,
    #[error("pipeline worker failed: {0}")]
    Worker(String),
}
