//! Body buffering and prefix-replay adapters.
//!
//! The executor buffers origin bodies while deciding whether to store them.
//! Buffered bytes can never be "un-read" from the underlying stream, so
//! when the configured object size limit is exceeded mid-read the already
//! consumed prefix must be replayed to the client ahead of the remaining
//! stream. [`BufferedBody::Partial`] is that combining adapter.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use http_body::{Body as HttpBody, Frame, SizeHint};
use pin_project::pin_project;

/// State of the stream behind a buffered prefix.
#[pin_project(project = RemainingProj)]
pub enum Remaining<B>
where
    B: HttpBody,
{
    /// The body stream continues.
    Body(#[pin] B),
    /// An error was encountered mid-stream; it is yielded once at the
    /// position it occurred, then the stream ends.
    Error(Option<B::Error>),
}

/// A buffered prefix followed by the rest of a body stream.
///
/// Implements [`HttpBody`]: the prefix is yielded first, then frames are
/// forwarded from the remaining stream.
#[pin_project]
pub struct PartialBufferedBody<B>
where
    B: HttpBody,
{
    prefix: Option<Bytes>,
    #[pin]
    remaining: Remaining<B>,
}

impl<B> PartialBufferedBody<B>
where
    B: HttpBody,
{
    /// Combines a consumed prefix with the remaining stream state.
    pub fn new(prefix: Option<Bytes>, remaining: Remaining<B>) -> Self {
        Self { prefix, remaining }
    }

    /// The buffered prefix, if not yet yielded.
    pub fn prefix(&self) -> Option<&Bytes> {
        self.prefix.as_ref()
    }
}

impl<B: HttpBody> HttpBody for PartialBufferedBody<B> {
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        if let Some(prefix) = this.prefix.take() {
            return Poll::Ready(Some(Ok(Frame::data(prefix))));
        }

        match this.remaining.project() {
            RemainingProj::Body(body) => match body.poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    let frame = frame.map_data(|mut data| data.copy_to_bytes(data.remaining()));
                    Poll::Ready(Some(Ok(frame)))
                }
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
            RemainingProj::Error(error) => match error.take() {
                Some(err) => Poll::Ready(Some(Err(err))),
                None => Poll::Ready(None),
            },
        }
    }

    fn size_hint(&self) -> SizeHint {
        let prefix_len = self.prefix.as_ref().map(|b| b.len() as u64).unwrap_or(0);
        match &self.remaining {
            Remaining::Body(body) => {
                let hint = body.size_hint();
                let lower = hint.lower().saturating_add(prefix_len);
                let mut result = SizeHint::new();
                result.set_lower(lower);
                if let Some(upper) = hint.upper() {
                    // A Content-Length-based upper bound does not know the
                    // prefix was already pulled off the stream.
                    result.set_upper(upper.saturating_add(prefix_len).max(lower));
                }
                result
            }
            Remaining::Error(_) => SizeHint::with_exact(prefix_len),
        }
    }

    fn is_end_stream(&self) -> bool {
        if self.prefix.is_some() {
            return false;
        }
        match &self.remaining {
            Remaining::Body(body) => body.is_end_stream(),
            Remaining::Error(err) => err.is_none(),
        }
    }
}

/// A body in one of three consumption states.
///
/// - [`Complete`](BufferedBody::Complete): fully buffered (stored entries,
///   synthesized responses, revalidation requests)
/// - [`Partial`](BufferedBody::Partial): a buffered prefix plus the
///   remaining stream or a replayed error
/// - [`Passthrough`](BufferedBody::Passthrough): an untouched stream
#[pin_project(project = BufferedBodyProj)]
pub enum BufferedBody<B>
where
    B: HttpBody,
{
    /// Fully buffered body. The `Option` yields the data once.
    Complete(Option<Bytes>),
    /// Buffered prefix plus remaining stream.
    Partial(#[pin] PartialBufferedBody<B>),
    /// Untouched stream, forwarded frame by frame.
    Passthrough(#[pin] B),
}

impl<B> BufferedBody<B>
where
    B: HttpBody,
{
    /// An empty, fully buffered body.
    pub fn empty() -> Self {
        BufferedBody::Complete(None)
    }

    /// A fully buffered body over `bytes`.
    pub fn complete(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            BufferedBody::Complete(None)
        } else {
            BufferedBody::Complete(Some(bytes))
        }
    }
}

/// Outcome of reading a body under a size limit.
pub enum ReadLimitOutcome<B>
where
    B: HttpBody,
{
    /// The whole body fit within the limit.
    Complete(Bytes),
    /// The limit was exceeded: the consumed prefix plus the remaining
    /// stream, ready to be handed through uncached.
    Overflow(PartialBufferedBody<B>),
    /// The stream failed mid-read: the consumed prefix plus the error,
    /// replayed to the client at the byte position it occurred.
    Failed(PartialBufferedBody<B>),
}

impl<B> BufferedBody<B>
where
    B: HttpBody + Send + Unpin,
    B::Data: Send,
{
    /// Reads the body into a buffer, stopping once `limit` bytes have been
    /// exceeded.
    ///
    /// No byte is lost in any outcome: overflow and failure both return a
    /// combining body that replays the consumed prefix.
    pub async fn read_up_to(self, limit: u64) -> ReadLimitOutcome<B> {
        use http_body_util::BodyExt;

        let (mut buffer, mut stream) = match self {
            BufferedBody::Complete(data) => {
                let bytes = data.unwrap_or_default();
                // Already materialized bodies are taken as-is; the size
                // check happens against the full buffer below.
                if bytes.len() as u64 > limit {
                    return ReadLimitOutcome::Overflow(PartialBufferedBody::new(
                        Some(bytes),
                        Remaining::Error(None),
                    ));
                }
                return ReadLimitOutcome::Complete(bytes);
            }
            BufferedBody::Partial(partial) => {
                let prefix = partial.prefix.map(|b| BytesMut::from(b.as_ref()));
                match partial.remaining {
                    Remaining::Body(body) => (prefix.unwrap_or_default(), body),
                    Remaining::Error(err) => {
                        let prefix = prefix.map(BytesMut::freeze);
                        return match err {
                            Some(err) => ReadLimitOutcome::Failed(PartialBufferedBody::new(
                                prefix,
                                Remaining::Error(Some(err)),
                            )),
                            None => ReadLimitOutcome::Complete(prefix.unwrap_or_default()),
                        };
                    }
                }
            }
            BufferedBody::Passthrough(body) => (BytesMut::new(), body),
        };

        loop {
            if buffer.len() as u64 > limit {
                return ReadLimitOutcome::Overflow(PartialBufferedBody::new(
                    Some(buffer.freeze()),
                    Remaining::Body(stream),
                ));
            }
            match stream.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(mut data) = frame.into_data() {
                        buffer.extend_from_slice(&data.copy_to_bytes(data.remaining()));
                    }
                }
                Some(Err(error)) => {
                    let prefix = if buffer.is_empty() {
                        None
                    } else {
                        Some(buffer.freeze())
                    };
                    return ReadLimitOutcome::Failed(PartialBufferedBody::new(
                        prefix,
                        Remaining::Error(Some(error)),
                    ));
                }
                None => return ReadLimitOutcome::Complete(buffer.freeze()),
            }
        }
    }
}

impl<B> HttpBody for BufferedBody<B>
where
    B: HttpBody,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            BufferedBodyProj::Complete(data) => match data.take() {
                Some(bytes) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                None => Poll::Ready(None),
            },
            BufferedBodyProj::Partial(partial) => partial.poll_frame(cx),
            BufferedBodyProj::Passthrough(body) => match body.poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    let frame = frame.map_data(|mut data| data.copy_to_bytes(data.remaining()));
                    Poll::Ready(Some(Ok(frame)))
                }
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            BufferedBody::Complete(Some(bytes)) => SizeHint::with_exact(bytes.len() as u64),
            BufferedBody::Complete(None) => SizeHint::with_exact(0),
            BufferedBody::Partial(partial) => partial.size_hint(),
            BufferedBody::Passthrough(body) => body.size_hint(),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            BufferedBody::Complete(None) => true,
            BufferedBody::Complete(Some(_)) => false,
            BufferedBody::Partial(partial) => partial.is_end_stream(),
            BufferedBody::Passthrough(body) => body.is_end_stream(),
        }
    }
}

impl<B> fmt::Debug for BufferedBody<B>
where
    B: HttpBody,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferedBody::Complete(Some(bytes)) => f
                .debug_tuple("Complete")
                .field(&format!("{} bytes", bytes.len()))
                .finish(),
            BufferedBody::Complete(None) => f.debug_tuple("Complete").field(&"empty").finish(),
            BufferedBody::Partial(partial) => {
                let prefix_len = partial.prefix().map(|b| b.len()).unwrap_or(0);
                f.debug_struct("Partial")
                    .field("prefix_len", &prefix_len)
                    .finish()
            }
            BufferedBody::Passthrough(_) => f.debug_tuple("Passthrough").field(&"...").finish(),
        }
    }
}
