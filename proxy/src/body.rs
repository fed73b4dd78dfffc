//! A response/request body enum spanning the two shapes this proxy ever
//! produces: the unmodified body streamed straight from hyper (passthrough)
//! or a fully-buffered body the rewriter has already produced in memory.
//! Grounded in `Plawn-r2e/r2e-grpc/src/multiplex.rs`'s `MultiplexBody`,
//! adapted from "route to service A or B" to "stream through or substitute
//! rewritten bytes".

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body, Frame};
use http_body_util::Full;
use hyper::body::Incoming;
use pin_project_lite::pin_project;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pin_project! {
    #[project = ProxyBodyProj]
    pub enum ProxyBody {
        Incoming { #[pin] inner: Incoming },
        Buffered { #[pin] inner: Full<Bytes> },
    }
}

impl ProxyBody {
    pub fn incoming(body: Incoming) -> Self {
        ProxyBody::Incoming { inner: body }
    }

    pub fn buffered(bytes: Bytes) -> Self {
        ProxyBody::Buffered { inner: Full::new(bytes) }
    }

    pub fn empty() -> Self {
        ProxyBody::buffered(Bytes::new())
    }
}

impl Body for ProxyBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            ProxyBodyProj::Incoming { inner } => inner.poll_frame(cx).map_err(Into::into),
            ProxyBodyProj::Buffered { inner } => inner.poll_frame(cx).map_err(Into::into),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            ProxyBody::Incoming { inner } => inner.is_end_stream(),
            ProxyBody::Buffered { inner } => inner.is_end_stream(),
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            ProxyBody::Incoming { inner } => inner.size_hint(),
            ProxyBody::Buffered { inner } => inner.size_hint(),
        }
    }
}
