//! Error taxonomy for the payload interception core.
//!
//! `DescriptorLoad`, `WireFormat`, `UnsupportedFraming`, `Lifecycle`, and
//! `Codec` are all per-call (or startup) fatal. A missing tenant header, an
//! unresolved method path, a non-gRPC request, or a payload-free message
//! type are not errors at all -- callers express that with the pipeline's
//! `Outcome::Passthrough`, never with this type.

use thiserror::Error;

/// Fatal error kinds produced by the descriptor store, payload field index,
/// wire rewriter, and codec contract.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The serialized file-descriptor-set could not be loaded: unparseable
    /// bytes, a dependency cycle, or a file whose dependencies can't all be
    /// satisfied by already-built descriptors.
    #[error("failed to load descriptor set: {0}")]
    DescriptorLoad(String),

    /// A truncated or oversize varint, a length-delimited field that would
    /// run past the buffer end, or an unrecognized wire kind on a field that
    /// must be traversed.
    #[error("malformed protobuf wire data at offset {offset}: {reason}")]
    WireFormat { offset: usize, reason: String },

    /// A gRPC frame with a non-zero compression flag, or a frame prefix
    /// shorter than 5 bytes.
    #[error("unsupported gRPC framing: {0}")]
    UnsupportedFraming(String),

    /// `Transform` called outside an open `Init..Finish` scope, or `Init`
    /// called twice for the same scope.
    #[error("codec lifecycle violation: {0}")]
    Lifecycle(String),

    /// Any error surfaced by the installed codec (external store
    /// unreachable, decryption failure, missing identifier on inbound
    /// resolution, malformed payload submessage).
    #[error("codec error while processing field '{field_path}': {source}")]
    Codec {
        field_path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl ProxyError {
    pub fn wire_format(offset: usize, reason: impl Into<String>) -> Self {
        ProxyError::WireFormat {
            offset,
            reason: reason.into(),
        }
    }

    pub fn codec(
        field_path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ProxyError::Codec {
            field_path: field_path.into(),
            source: Box::new(source),
        }
    }

    /// Best-effort classification used by the surrounding proxy to pick a
    /// gRPC status code. The core does not fabricate upstream responses; it
    /// only classifies.
    pub fn grpc_code(&self) -> tonic::Code {
        match self {
            ProxyError::DescriptorLoad(_) => tonic::Code::Internal,
            ProxyError::WireFormat { .. } => tonic::Code::Internal,
            ProxyError::UnsupportedFraming(_) => tonic::Code::Unimplemented,
            ProxyError::Lifecycle(_) => tonic::Code::Internal,
            ProxyError::Codec { .. } => tonic::Code::Internal,
        }
    }
}

/// Convenience alias used throughout the core.
pub type Result<T> = std::result::Result<T, ProxyError>;
