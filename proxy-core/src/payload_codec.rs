//! Payload codec contract.
//!
//! A codec transforms one serialized payload submessage at a time. Every
//! codec implements `transform`; codecs that need request-scoped batching
//! additionally report `has_lifecycle() == true` and override `init`/
//! `finish`. The rewriter and pipeline never branch on a concrete codec
//! type -- they call `init`/`finish` unconditionally bracketing a call and
//! rely on the stateless default no-ops to make that a non-event for
//! codecs that don't need it.

use async_trait::async_trait;
use prost_reflect::FieldDescriptor;

use crate::error::Result;

/// Which leg of a call a transform belongs to. Outbound is client-to-upstream
/// (the request); inbound is upstream-to-client (the response).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Per-payload context handed to every codec invocation. `field_path` is a
/// human-readable locator (`input.payloads[]`, `header.fields.correlation-id`)
/// with no semantic meaning to the core; codecs may use it for conditional
/// policy.
#[derive(Debug, Clone)]
pub struct PayloadContext {
    pub tenant: String,
    pub field_path: String,
    pub field_descriptor: Option<FieldDescriptor>,
}

impl PayloadContext {
    pub fn new(tenant: impl Into<String>, field_path: impl Into<String>) -> Self {
        PayloadContext {
            tenant: tenant.into(),
            field_path: field_path.into(),
            field_descriptor: None,
        }
    }

    pub fn with_field_descriptor(mut self, field_descriptor: FieldDescriptor) -> Self {
        self.field_descriptor = Some(field_descriptor);
        self
    }
}

/// The per-call, per-direction transform contract. Implementors are free to
/// be purely stateless (only `transform` matters) or request-scoped
/// (override `has_lifecycle`, `init`, `finish`); the rewriter treats every
/// codec uniformly.
#[async_trait]
pub trait PayloadCodec: Send + Sync {
    /// Transform one serialized `Payload` submessage's bytes and return the
    /// replacement bytes to serialize in its place.
    async fn transform(&self, direction: Direction, ctx: &PayloadContext, bytes: Vec<u8>) -> Result<Vec<u8>>;

    /// Whether this codec needs `init`/`finish` bracketing. Stateless codecs
    /// leave this `false`; the pipeline still calls `init`/`finish`
    /// regardless, but a stateless codec's default implementations are
    /// no-ops, so the bracket is free.
    fn has_lifecycle(&self) -> bool {
        false
    }

    /// Called exactly once per intercepted call, before any `transform` for
    /// this direction.
    async fn init(&self, _direction: Direction) -> Result<()> {
        Ok(())
    }

    /// Called exactly once per intercepted call, after all `transform`
    /// calls for this direction have completed (successfully or not).
    async fn finish(&self, _direction: Direction) -> Result<()> {
        Ok(())
    }

    /// Codecs whose inbound `transform` can only return a placeholder
    /// (because the real value depends on work `finish` does) return a
    /// second codec here; the pipeline runs one more rewrite pass over the
    /// already-rewritten bytes using it once `finish(Inbound)` has
    /// returned. Most codecs need no second pass and leave this `None`.
    fn deferred_resolution(&self) -> Option<&(dyn PayloadCodec + Sync)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StatelessUppercase;

    #[async_trait]
    impl PayloadCodec for StatelessUppercase {
        async fn transform(&self, _direction: Direction, _ctx: &PayloadContext, bytes: Vec<u8>) -> Result<Vec<u8>> {
            Ok(bytes.to_ascii_uppercase())
        }
    }

    #[tokio::test]
    async fn stateless_codec_defaults_are_inert() {
        let codec = StatelessUppercase;
        assert!(!codec.has_lifecycle());
        codec.init(Direction::Outbound).await.unwrap();
        let out = codec
            .transform(Direction::Outbound, &PayloadContext::new("t1", "input"), b"hi".to_vec())
            .await
            .unwrap();
        assert_eq!(out, b"HI");
        codec.finish(Direction::Outbound).await.unwrap();
    }

    #[test]
    fn payload_context_builder_attaches_field_descriptor() {
        let ctx = PayloadContext::new("t1", "input.payloads[]");
        assert_eq!(ctx.tenant, "t1");
        assert_eq!(ctx.field_path, "input.payloads[]");
        assert!(ctx.field_descriptor.is_none());
    }
}
