//! Descriptor-driven protobuf payload locator and streaming wire rewriter.
//!
//! This crate is transport-agnostic: it knows how to resolve a gRPC method
//! path against a compiled descriptor set, classify which fields of a
//! message carry payload data, and rewrite those payloads in place while
//! leaving every other byte on the wire untouched. The surrounding HTTP/2
//! proxy (see the `payload-proxy` binary crate) owns the listener, the
//! upstream connection, and the header/content-type gate.

pub mod batching;
pub mod error;
pub mod identity;
pub mod index;
pub mod payload_codec;
pub mod payload_model;
pub mod pipeline;
pub mod store;
pub mod wire;

pub use batching::{BatchingCodec, ExternalRecord, ExternalStore, InMemoryExternalStore};
pub use error::{ProxyError, Result};
pub use identity::IdentityCodec;
pub use index::{IndexConfig, PayloadFieldIndex};
pub use payload_codec::{Direction, PayloadCodec, PayloadContext};
pub use pipeline::{build_grpc_frame, strip_grpc_frame, InterceptionPipeline, Outcome, TemporalContext, TENANT_HEADER};
pub use store::{DescriptorStore, ServiceMethodInfo};
