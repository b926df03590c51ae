//! Streaming behavior of the body adapters.

use bytes::Bytes;
use cachefront::body::{BufferedBody, PartialBufferedBody, ReadLimitOutcome, Remaining};
use futures::stream;
use http_body::Frame;
use http_body_util::{BodyExt, Full, StreamBody};
use std::convert::Infallible;

type Chunks = StreamBody<
    stream::Iter<std::vec::IntoIter<Result<Frame<Bytes>, Infallible>>>,
>;

fn chunked(parts: &[&str]) -> Chunks {
    let frames: Vec<Result<Frame<Bytes>, Infallible>> = parts
        .iter()
        .map(|part| Ok(Frame::data(Bytes::from(part.to_string()))))
        .collect();
    StreamBody::new(stream::iter(frames))
}

#[tokio::test]
async fn complete_body_yields_its_bytes_once() {
    let body = BufferedBody::<Full<Bytes>>::complete(Bytes::from_static(b"abc"));
    let collected = body.collect().await.unwrap().to_bytes();
    assert_eq!(collected, Bytes::from_static(b"abc"));
}

#[tokio::test]
async fn passthrough_within_limit_buffers_fully() {
    let body = BufferedBody::Passthrough(chunked(&["hel", "lo"]));
    match body.read_up_to(100).await {
        ReadLimitOutcome::Complete(bytes) => assert_eq!(bytes, Bytes::from_static(b"hello")),
        _ => panic!("expected complete buffering"),
    }
}

#[tokio::test]
async fn overflow_preserves_prefix_and_remaining_stream() {
    let body = BufferedBody::Passthrough(chunked(&["ab", "cd", "ef"]));
    let partial = match body.read_up_to(3).await {
        ReadLimitOutcome::Overflow(partial) => partial,
        _ => panic!("expected overflow"),
    };
    // No byte may be lost: buffered prefix replays ahead of the stream.
    let replayed = partial.collect().await.unwrap().to_bytes();
    assert_eq!(replayed, Bytes::from_static(b"abcdef"));
}

#[tokio::test]
async fn exact_limit_is_not_an_overflow() {
    let body = BufferedBody::Passthrough(chunked(&["abcd"]));
    match body.read_up_to(4).await {
        ReadLimitOutcome::Complete(bytes) => assert_eq!(bytes, Bytes::from_static(b"abcd")),
        _ => panic!("a body exactly at the limit is cacheable"),
    }
}

#[tokio::test]
async fn partial_body_streams_prefix_then_rest() {
    let partial = PartialBufferedBody::new(
        Some(Bytes::from_static(b"ab")),
        Remaining::Body(chunked(&["cd"])),
    );
    let collected = partial.collect().await.unwrap().to_bytes();
    assert_eq!(collected, Bytes::from_static(b"abcd"));
}

#[tokio::test]
async fn empty_body_is_end_of_stream() {
    use http_body::Body;
    let body = BufferedBody::<Full<Bytes>>::empty();
    assert!(body.is_end_stream());
    assert_eq!(body.size_hint().exact(), Some(0));
}

#[tokio::test]
async fn size_hint_accounts_for_buffered_prefix() {
    use http_body::Body;
    let partial = PartialBufferedBody::new(
        Some(Bytes::from_static(b"abc")),
        Remaining::Body(chunked(&["de"])),
    );
    assert!(partial.size_hint().lower() >= 3);
    assert!(!partial.is_end_stream());
}
