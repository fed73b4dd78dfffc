//! Interception pipeline.
//!
//! Orchestrates one gRPC unary call: resolves the method path against the
//! descriptor store, builds the per-call context, strips/rebuilds the gRPC
//! frame prefix, and drives the wire rewriter and codec lifecycle in each
//! direction. Deliberately transport-agnostic -- it knows nothing about
//! `http`/`hyper` types; the surrounding HTTP/2 front (outside this crate)
//! is responsible for the method/content-type gate and for the
//! case-insensitive header lookup it passes in here.

use crate::error::{ProxyError, Result};
use crate::index::PayloadFieldIndex;
use crate::payload_codec::{Direction, PayloadCodec};
use crate::store::DescriptorStore;
use crate::wire;

/// Canonical name of the tenant header, compared case-insensitively by the
/// caller before it reaches `resolve`.
pub const TENANT_HEADER: &str = "temporal-namespace";

/// Per-call context built once a method path and tenant have both resolved.
#[derive(Debug, Clone)]
pub struct TemporalContext {
    pub tenant: String,
    pub path: String,
    pub request_type_name: String,
    pub response_type_name: String,
}

/// The result of attempting to intercept one leg of a call.
#[derive(Debug)]
pub enum Outcome {
    /// No transformation applies; the caller must forward the original
    /// bytes/headers untouched.
    Passthrough,
    /// The new framed gRPC message bytes to forward in place of the input.
    Rewritten(Vec<u8>),
}

pub struct InterceptionPipeline {
    store: DescriptorStore,
    index: PayloadFieldIndex,
}

impl InterceptionPipeline {
    pub fn new(store: DescriptorStore, index: PayloadFieldIndex) -> Self {
        InterceptionPipeline { store, index }
    }

    pub fn store(&self) -> &DescriptorStore {
        &self.store
    }

    pub fn index(&self) -> &PayloadFieldIndex {
        &self.index
    }

    /// Resolves the method and builds the call context, or
    /// returns `None` for a passthrough (unknown path, missing tenant
    /// header, or a non-unary method -- streaming is out of scope and
    /// always passed through).
    pub fn resolve(&self, path: &str, tenant_header: Option<&str>) -> Option<TemporalContext> {
        let method_info = self.store.lookup_method(path)?;
        if !method_info.is_unary() {
            return None;
        }
        let tenant = tenant_header?.to_string();
        Some(TemporalContext {
            tenant,
            path: path.to_string(),
            request_type_name: method_info.request_type_name,
            response_type_name: method_info.response_type_name,
        })
    }

    /// Outbound (request) rewrite. `framed_body` is the
    /// complete gRPC-framed request body (5-byte prefix + message).
    pub async fn rewrite_request(
        &self,
        ctx: &TemporalContext,
        codec: &(dyn PayloadCodec + Sync),
        framed_body: &[u8],
    ) -> Result<Outcome> {
        if !self.index.message_has_payloads(&ctx.request_type_name) {
            return Ok(Outcome::Passthrough);
        }

        let message_bytes = strip_grpc_frame(framed_body)?;
        codec.init(Direction::Outbound).await?;
        let rewrite_result = wire::rewrite(
            &self.store,
            &self.index,
            codec,
            Direction::Outbound,
            &ctx.tenant,
            &ctx.request_type_name,
            message_bytes,
        )
        .await;
        // Finish runs even on the error path so codecs can release resources.
        let finish_result = codec.finish(Direction::Outbound).await;
        let rewritten = rewrite_result?;
        finish_result?;

        Ok(Outcome::Rewritten(build_grpc_frame(&rewritten)))
    }

    /// Inbound (response) rewrite, symmetric to
    /// `rewrite_request` except that a codec may need a second pass (see
    /// [`PayloadCodec::deferred_resolution`]) once `finish(Inbound)` has
    /// populated whatever it deferred during `transform`.
    pub async fn rewrite_response(
        &self,
        ctx: &TemporalContext,
        codec: &(dyn PayloadCodec + Sync),
        framed_body: &[u8],
    ) -> Result<Outcome> {
        if !self.index.message_has_payloads(&ctx.response_type_name) {
            return Ok(Outcome::Passthrough);
        }

        let message_bytes = strip_grpc_frame(framed_body)?;
        codec.init(Direction::Inbound).await?;
        let rewrite_result = wire::rewrite(
            &self.store,
            &self.index,
            codec,
            Direction::Inbound,
            &ctx.tenant,
            &ctx.response_type_name,
            message_bytes,
        )
        .await;
        let finish_result = codec.finish(Direction::Inbound).await;
        let rewritten = rewrite_result?;
        finish_result?;

        let resolved = if let Some(patcher) = codec.deferred_resolution() {
            wire::rewrite(
                &self.store,
                &self.index,
                patcher,
                Direction::Inbound,
                &ctx.tenant,
                &ctx.response_type_name,
                &rewritten,
            )
            .await?
        } else {
            rewritten
        };

        Ok(Outcome::Rewritten(build_grpc_frame(&resolved)))
    }
}

/// The gRPC frame prefix: 1-byte compression flag (must be 0) + 4-byte
/// big-endian message length. Returns the message bytes with the prefix
/// stripped.
pub fn strip_grpc_frame(framed: &[u8]) -> Result<&[u8]> {
    if framed.len() < 5 {
        return Err(ProxyError::UnsupportedFraming("frame shorter than the 5-byte prefix".into()));
    }
    let compression_flag = framed[0];
    if compression_flag != 0 {
        return Err(ProxyError::UnsupportedFraming(format!(
            "compressed gRPC frame (flag = {compression_flag})"
        )));
    }
    let length = u32::from_be_bytes([framed[1], framed[2], framed[3], framed[4]]) as usize;
    let message = &framed[5..];
    if message.len() != length {
        return Err(ProxyError::UnsupportedFraming(format!(
            "frame length prefix {length} does not match message length {}",
            message.len()
        )));
    }
    Ok(message)
}

/// Re-prepend a freshly computed, uncompressed gRPC frame prefix.
pub fn build_grpc_frame(message: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(5 + message.len());
    framed.push(0);
    framed.extend_from_slice(&(message.len() as u32).to_be_bytes());
    framed.extend_from_slice(message);
    framed
}
