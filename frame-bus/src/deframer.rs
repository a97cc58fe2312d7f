use std::{collections::TryReserveError, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    channel::{ByteChannel, ChannelRead},
    error::ChannelError,
};

/// Bytes of exactly one frame, borrowed from the deframer's accumulation buffer.
///
/// The view is valid until the next call to [`Deframer::next_frame`], which
/// overwrites the buffer in place.
#[derive(Clone, Copy, Debug)]
pub struct RawChunk<'a> {
    data: &'a [u8],
}

impl<'a> RawChunk<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug)]
pub enum Deframed<'a> {
    Frame(RawChunk<'a>),
    /// Channel ended. `discarded` bytes of an incomplete frame were dropped.
    EndOfStream { discarded: usize },
    /// Stop was requested. `discarded` bytes of an incomplete frame were dropped.
    Cancelled { discarded: usize },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeframerCounters {
    pub frames: u64,
    pub bytes: u64,
    pub idle_retries: u64,
}

/// Cuts a marker-less byte stream into fixed-size frames.
pub struct Deframer {
    channel: ByteChannel,
    buf: Vec<u8>,
    idle_backoff: Duration,
    counters: DeframerCounters,
}

impl Deframer {
    /// Fails only if the accumulation buffer cannot be allocated.
    pub fn new(
        channel: ByteChannel,
        frame_size: usize,
        idle_backoff: Duration,
    ) -> Result<Self, TryReserveError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(frame_size)?;
        buf.resize(frame_size, 0);
        Ok(Self {
            channel,
            buf,
            idle_backoff,
            counters: DeframerCounters::default(),
        })
    }

    pub fn frame_size(&self) -> usize {
        self.buf.len()
    }

    pub fn counters(&self) -> DeframerCounters {
        self.counters
    }

    pub fn channel(&self) -> &ByteChannel {
        &self.channel
    }

    pub fn close(&mut self) {
        self.channel.close();
    }

    /// Accumulates reads until one full frame is buffered, the channel ends, or
    /// `cancel` fires. Reads and idle backoffs both race the token.
    pub async fn next_frame(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Deframed<'_>, ChannelError> {
        let frame_size = self.buf.len();
        let mut filled = 0;

        while filled < frame_size {
            if cancel.is_cancelled() {
                return Ok(Deframed::Cancelled { discarded: filled });
            }

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Ok(Deframed::Cancelled { discarded: filled });
                }
                read = self.channel.read(&mut self.buf[filled..]) => read?,
            };

            match read {
                ChannelRead::Data(n) => {
                    filled += n;
                    self.counters.bytes += n as u64;
                }
                ChannelRead::Idle => {
                    self.counters.idle_retries += 1;
                    log::trace!("deframer: channel idle, retrying in {:?}", self.idle_backoff);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Ok(Deframed::Cancelled { discarded: filled });
                        }
                        _ = tokio::time::sleep(self.idle_backoff) => {}
                    }
                }
                ChannelRead::Closed => {
                    if filled > 0 {
                        log::warn!(
                            "deframer: end of stream inside a frame, dropping {} of {} bytes",
                            filled,
                            frame_size
                        );
                    }
                    return Ok(Deframed::EndOfStream { discarded: filled });
                }
            }
        }

        self.counters.frames += 1;
        Ok(Deframed::Frame(RawChunk::new(&self.buf)))
    }
}

#[cfg(test)]
#[path = "deframer_test.rs"]
mod deframer_test;
