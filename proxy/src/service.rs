//! The HTTP/2 front door. Implements the method / content-type / path
//! gate and drives the transport-agnostic `InterceptionPipeline` (in
//! `payload-proxy-core`) for everything past that gate. This is the only
//! module in the workspace that knows about `hyper`/`tower`/`http-body` --
//! the boundary to the external reverse-proxy fabric, kept as small as
//! correctness allows.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use payload_proxy_core::{InterceptionPipeline, Outcome, PayloadCodec, ProxyError, TENANT_HEADER};
use tower::Service;
use tracing::{error, info_span, Instrument};

use crate::body::ProxyBody;
use crate::upstream::UpstreamClient;

const GRPC_CONTENT_TYPE: &str = "application/grpc";

pub type CodecFactory = Arc<dyn Fn() -> Box<dyn PayloadCodec + Sync> + Send + Sync>;

#[derive(Clone)]
pub struct ProxyService {
    pipeline: Arc<InterceptionPipeline>,
    codec_factory: CodecFactory,
    upstream: UpstreamClient,
}

impl ProxyService {
    pub fn new(pipeline: Arc<InterceptionPipeline>, codec_factory: CodecFactory, upstream: UpstreamClient) -> Self {
        ProxyService {
            pipeline,
            codec_factory,
            upstream,
        }
    }
}

impl Service<Request<Incoming>> for ProxyService {
    type Response = Response<ProxyBody>;
    type Error = std::convert::Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Incoming>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(this.handle(request).await) })
    }
}

impl ProxyService {
    async fn handle(&self, request: Request<Incoming>) -> Response<ProxyBody> {
        if !is_unary_grpc_candidate(&request) {
            return self.passthrough(request).await;
        }

        let path = request.uri().path().to_string();
        let tenant = request
            .headers()
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok());
        let Some(ctx) = self.pipeline.resolve(&path, tenant) else {
            return self.passthrough(request).await;
        };

        let span = info_span!("intercept_call", call.path = %ctx.path, call.tenant = %ctx.tenant);
        async move {
            let (parts, body) = request.into_parts();
            let body_bytes = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(err) => {
                    error!(error = %err, "failed reading request body");
                    return error_response(StatusCode::BAD_REQUEST, tonic::Code::Internal, "failed to read request body");
                }
            };

            let codec = (self.codec_factory)();

            let request_outcome = self.pipeline.rewrite_request(&ctx, codec.as_ref(), &body_bytes).await;
            let outbound_bytes = match request_outcome {
                Ok(Outcome::Passthrough) => body_bytes,
                Ok(Outcome::Rewritten(bytes)) => Bytes::from(bytes),
                Err(err) => return fatal_response(&ctx.path, err),
            };

            let mut upstream_request = Request::from_parts(parts, ProxyBody::buffered(outbound_bytes.clone()));
            upstream_request
                .headers_mut()
                .insert(http::header::CONTENT_LENGTH, HeaderValue::from(outbound_bytes.len() as u64));

            let upstream_response = match self.upstream.send(upstream_request).await {
                Ok(resp) => resp,
                Err(err) => {
                    error!(error = %err, "upstream request failed");
                    return error_response(StatusCode::BAD_GATEWAY, tonic::Code::Unavailable, "upstream unreachable");
                }
            };

            let (resp_parts, resp_body) = upstream_response.into_parts();
            let resp_bytes = match resp_body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(err) => {
                    error!(error = %err, "failed reading upstream response body");
                    return error_response(StatusCode::BAD_GATEWAY, tonic::Code::Unavailable, "failed to read upstream response");
                }
            };

            let response_outcome = self.pipeline.rewrite_response(&ctx, codec.as_ref(), &resp_bytes).await;
            let final_bytes = match response_outcome {
                Ok(Outcome::Passthrough) => resp_bytes,
                Ok(Outcome::Rewritten(bytes)) => Bytes::from(bytes),
                Err(err) => return fatal_response(&ctx.path, err),
            };

            let mut response = Response::from_parts(resp_parts, ProxyBody::buffered(final_bytes.clone()));
            response
                .headers_mut()
                .insert(http::header::CONTENT_LENGTH, HeaderValue::from(final_bytes.len() as u64));
            response
        }
        .instrument(span)
        .await
    }

    /// Gate fallthrough and "unknown method / missing tenant" cases:
    /// forward the request exactly as received, streaming the body instead
    /// of buffering it.
    async fn passthrough(&self, request: Request<Incoming>) -> Response<ProxyBody> {
        let (parts, body) = request.into_parts();
        let upstream_request = Request::from_parts(parts, ProxyBody::incoming(body));
        match self.upstream.send(upstream_request).await {
            Ok(resp) => {
                let (parts, body) = resp.into_parts();
                Response::from_parts(parts, ProxyBody::incoming(body))
            }
            Err(err) => {
                error!(error = %err, "upstream request failed during passthrough");
                error_response(StatusCode::BAD_GATEWAY, tonic::Code::Unavailable, "upstream unreachable")
            }
        }
    }
}

fn is_unary_grpc_candidate(request: &Request<Incoming>) -> bool {
    if request.method() != Method::POST {
        return false;
    }
    let content_type_ok = request
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with(GRPC_CONTENT_TYPE))
        .unwrap_or(false);
    if !content_type_ok {
        return false;
    }
    let path = request.uri().path();
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let mut segments = trimmed.split('/');
    matches!((segments.next(), segments.next(), segments.next()), (Some(a), Some(b), None) if !a.is_empty() && !b.is_empty())
}

/// A trailers-only gRPC error: `grpc-status`/`grpc-message` carried on the
/// response headers with an empty, already-ended body, since the core never
/// fabricates upstream responses -- it only classifies.
fn fatal_response(path: &str, err: ProxyError) -> Response<ProxyBody> {
    let field_path = match &err {
        ProxyError::Codec { field_path, .. } => field_path.as_str(),
        _ => "<none>",
    };
    error!(call.path = %path, field.path = %field_path, error = %err, "call failed");
    error_response(StatusCode::OK, err.grpc_code(), &err.to_string())
}

fn error_response(status: StatusCode, code: tonic::Code, message: &str) -> Response<ProxyBody> {
    let mut response = Response::new(ProxyBody::empty());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(http::header::CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
    response.headers_mut().insert(
        "grpc-status",
        HeaderValue::from_str(&(code as i32).to_string()).expect("status code digits are valid header bytes"),
    );
    if let Ok(value) = HeaderValue::from_str(message) {
        response.headers_mut().insert("grpc-message", value);
    }
    response
}
