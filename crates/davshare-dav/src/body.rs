//! Response body type for the engine.
//!
//! One concrete body covers the three shapes a handler produces: nothing
//! (HEAD, 204), a buffered payload (XML documents, error text), or a
//! chunked file stream for GET.

use crate::fs::ByteStream;
use bytes::Bytes;
use futures::Stream;
use http_body::{Body, Frame, SizeHint};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// HTTP response body: empty, buffered, or streamed from the store.
pub struct DavBody {
    inner: Inner,
}

enum Inner {
    Empty,
    Full(Option<Bytes>),
    Stream(ByteStream),
}

impl DavBody {
    pub fn empty() -> Self {
        DavBody { inner: Inner::Empty }
    }

    pub fn full(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        if data.is_empty() {
            Self::empty()
        } else {
            DavBody { inner: Inner::Full(Some(data)) }
        }
    }

    pub fn stream(stream: ByteStream) -> Self {
        DavBody { inner: Inner::Stream(stream) }
    }
}

impl Body for DavBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        // All variants are Unpin: Bytes trivially, BoxStream by its box.
        let this = self.get_mut();
        match &mut this.inner {
            Inner::Empty => Poll::Ready(None),
            Inner::Full(data) => Poll::Ready(data.take().map(|b| Ok(Frame::data(b)))),
            Inner::Stream(s) => Pin::new(s)
                .poll_next(cx)
                .map(|opt| opt.map(|res| res.map(Frame::data))),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            Inner::Empty => true,
            Inner::Full(data) => data.is_none(),
            Inner::Stream(_) => false,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            Inner::Empty => SizeHint::with_exact(0),
            Inner::Full(Some(data)) => SizeHint::with_exact(data.len() as u64),
            Inner::Full(None) => SizeHint::with_exact(0),
            Inner::Stream(_) => SizeHint::default(),
        }
    }
}
