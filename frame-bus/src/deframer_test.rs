use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::{Deframed, Deframer};
use crate::{
    channel::{ByteChannel, ChannelKind},
    testing::{ScriptedReader, counting_bytes},
};

fn deframer(reader: ScriptedReader, kind: ChannelKind, frame_size: usize) -> Deframer {
    let channel = ByteChannel::from_reader(reader, kind);
    Deframer::new(channel, frame_size, Duration::from_millis(1)).unwrap()
}

#[tokio::test]
async fn test_any_chunking_yields_one_identical_frame() {
    let data = counting_bytes(12);
    let cancel = CancellationToken::new();

    for chunk in [1, 2, 5, 7, 12] {
        let mut d = deframer(ScriptedReader::chunked(&data, chunk), ChannelKind::Stream, 12);

        match d.next_frame(&cancel).await.unwrap() {
            Deframed::Frame(raw) => assert_eq!(raw.as_bytes(), &data[..], "chunk size {}", chunk),
            other => panic!("chunk size {}: expected frame, got {:?}", chunk, other),
        }
        match d.next_frame(&cancel).await.unwrap() {
            Deframed::EndOfStream { discarded } => assert_eq!(discarded, 0),
            other => panic!("expected end of stream, got {:?}", other),
        }
        assert_eq!(d.counters().frames, 1);
        assert_eq!(d.counters().bytes, 12);
    }
}

#[tokio::test]
async fn test_reads_spanning_frame_boundaries() {
    // one read carries the tail of frame 0 and the head of frame 1
    let data = counting_bytes(24);
    let reader = ScriptedReader::new(vec![data[..9].to_vec(), data[9..24].to_vec()]);
    let mut d = deframer(reader, ChannelKind::Stream, 12);
    let cancel = CancellationToken::new();

    let Deframed::Frame(first) = d.next_frame(&cancel).await.unwrap() else {
        panic!("expected first frame");
    };
    assert_eq!(first.as_bytes(), &data[..12]);

    let Deframed::Frame(second) = d.next_frame(&cancel).await.unwrap() else {
        panic!("expected second frame");
    };
    assert_eq!(second.as_bytes(), &data[12..]);
}

#[tokio::test]
async fn test_short_frame_at_end_of_stream_is_discarded() {
    let data = counting_bytes(5);
    let mut d = deframer(ScriptedReader::chunked(&data, 2), ChannelKind::Stream, 12);
    let cancel = CancellationToken::new();

    match d.next_frame(&cancel).await.unwrap() {
        Deframed::EndOfStream { discarded } => assert_eq!(discarded, 5),
        other => panic!("expected end of stream, got {:?}", other),
    }
    assert_eq!(d.counters().frames, 0);
}

#[tokio::test]
async fn test_idle_reads_are_retried() {
    let data = counting_bytes(12);
    let reader = ScriptedReader::new(vec![
        vec![],
        vec![],
        data[..4].to_vec(),
        data[4..].to_vec(),
    ]);
    let mut d = deframer(reader, ChannelKind::Fifo, 12);
    let cancel = CancellationToken::new();

    match d.next_frame(&cancel).await.unwrap() {
        Deframed::Frame(raw) => assert_eq!(raw.as_bytes(), &data[..]),
        other => panic!("expected frame, got {:?}", other),
    }
    assert_eq!(d.counters().idle_retries, 2);
}

#[tokio::test]
async fn test_cancel_interrupts_blocked_read() {
    let (mut writer, reader) = tokio::io::duplex(64);
    writer.write_all(&[1, 2, 3]).await.unwrap();

    let channel = ByteChannel::from_reader(reader, ChannelKind::Stream);
    let mut d = Deframer::new(channel, 12, Duration::from_millis(1)).unwrap();
    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel_clone.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(5), d.next_frame(&cancel))
        .await
        .expect("cancel must wake the read");
    match result.unwrap() {
        Deframed::Cancelled { discarded } => assert_eq!(discarded, 3),
        other => panic!("expected cancelled, got {:?}", other),
    }
    drop(writer);
}

#[tokio::test]
async fn test_cancel_interrupts_idle_backoff() {
    let reader = ScriptedReader::new(vec![vec![]; 1000]);
    let channel = ByteChannel::from_reader(reader, ChannelKind::Follow);
    let mut d = Deframer::new(channel, 12, Duration::from_secs(60)).unwrap();
    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel_clone.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(5), d.next_frame(&cancel))
        .await
        .expect("cancel must wake the backoff");
    assert!(matches!(result.unwrap(), Deframed::Cancelled { discarded: 0 }));
}
