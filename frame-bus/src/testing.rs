use std::{
    collections::VecDeque,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, ReadBuf};

/// Reader that hands out a fixed script of reads. An empty entry produces a
/// zero-length read; an exhausted script reads as end-of-file.
pub(crate) struct ScriptedReader {
    script: VecDeque<Vec<u8>>,
}

impl ScriptedReader {
    pub(crate) fn new(script: Vec<Vec<u8>>) -> Self {
        Self {
            script: script.into(),
        }
    }

    /// Splits `data` into reads of at most `chunk` bytes.
    pub(crate) fn chunked(data: &[u8], chunk: usize) -> Self {
        Self::new(data.chunks(chunk).map(|c| c.to_vec()).collect())
    }
}

impl AsyncRead for ScriptedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(mut chunk) = self.script.pop_front() {
            let n = chunk.len().min(buf.remaining());
            buf.put_slice(&chunk[..n]);
            if n < chunk.len() {
                chunk.drain(..n);
                self.script.push_front(chunk);
            }
        }
        Poll::Ready(Ok(()))
    }
}

pub(crate) fn counting_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

/// Reader whose every read fails.
pub(crate) struct FailingReader;

impl AsyncRead for FailingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::other("device unplugged")))
    }
}
