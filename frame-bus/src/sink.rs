use std::{
    ops::ControlFlow,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::frame::{FrameConsumer, RunOutcome, TimedFrame};

/// Consumer half of a bounded frame queue. Hands frames to async code through
/// the paired [`FrameStream`].
///
/// A full queue blocks the pipeline worker, so the stream reader sets the pace.
/// Dropping the stream detaches the sink and ends the run. A stop request
/// abandons a send that is waiting for room; that frame is dropped.
pub struct FrameSink {
    tx: mpsc::Sender<TimedFrame>,
    stop: CancellationToken,
}

impl FrameSink {
    pub fn channel(capacity: usize) -> (FrameSink, FrameStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            FrameSink {
                tx,
                stop: CancellationToken::new(),
            },
            FrameStream {
                inner: ReceiverStream::new(rx),
            },
        )
    }
}

impl FrameConsumer for FrameSink {
    fn on_start(&mut self, stop: &CancellationToken) {
        self.stop = stop.clone();
    }

    fn on_frame(&mut self, frame: TimedFrame) -> ControlFlow<()> {
        let sent = futures::executor::block_on(async {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => None,
                sent = self.tx.send(frame) => Some(sent),
            }
        });
        match sent {
            Some(Ok(())) => ControlFlow::Continue(()),
            Some(Err(_)) => {
                log::debug!("sink: stream dropped, detaching");
                ControlFlow::Break(())
            }
            None => {
                log::debug!("sink: stop requested, dropping queued send");
                ControlFlow::Break(())
            }
        }
    }

    fn on_finish(&mut self, outcome: &RunOutcome) {
        log::debug!("sink: run finished, {}", outcome);
    }
}

/// Frames of one run, ending when the run ends.
pub struct FrameStream {
    inner: ReceiverStream<TimedFrame>,
}

impl FrameStream {
    pub async fn recv(&mut self) -> Option<TimedFrame> {
        self.inner.next().await
    }
}

impl Stream for FrameStream {
    type Item = TimedFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
