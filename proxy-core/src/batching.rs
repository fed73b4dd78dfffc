//! Reference batching codec.
//!
//! Buffers outbound payload transforms and flushes them as one batched
//! external write per tenant in `finish(Outbound)`. On the inbound leg,
//! `transform` cannot literally suspend until `finish` resolves it without
//! deadlocking a single-pass sequential rewrite walk (entry 2 can't
//! register until entry 1's `transform` call returns, and entry 1 won't
//! return until `finish` -- which only runs after the whole walk -- has
//! resolved it). Instead, inbound resolution is split into two
//! synchronous sub-passes the pipeline drives:
//!
//! 1. `transform(Inbound, ...)` registers the pending entry and returns a
//!    payload whose metadata is already in its final, restored shape and
//!    whose `data` is a placeholder holding the opaque identifier.
//! 2. `finish(Inbound)` performs the batched read, populating a
//!    `id -> resolved bytes` table shared with [`deferred_resolution`].
//! 3. The pipeline runs a second rewrite pass, over every payload field of
//!    the response (not just the ones this call externalized), using the
//!    codec returned by `deferred_resolution`. It looks up each
//!    placeholder's identifier and splices in the real data, and leaves
//!    any payload whose data doesn't match a pending identifier -- a
//!    genuine passthrough, per the inbound non-sentinel rule -- untouched.
//!
//! This preserves every property a literal suspended future would give a
//! caller (one `Transform` call per payload, in order; one batched read
//! per tenant; `finish` after all `Transform`s) without a channel that
//! could never be satisfied by a strictly sequential walk.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use prost::Message;
use uuid::Uuid;

use crate::error::{ProxyError, Result};
use crate::payload_codec::{Direction, PayloadCodec, PayloadContext};
use crate::payload_model::Payload;

pub const SENTINEL_ENCODING: &str = "payload-proxy/external-ref-v1";
pub const ENCODING_KEY: &str = "encoding";
pub const ENCODING_ORIGINAL_KEY: &str = "encoding-original";
pub const IDENTIFIER_KEY: &str = "payload-proxy-id";

/// One record bound for a single batched external write.
#[derive(Debug, Clone)]
pub struct ExternalRecord {
    pub id: String,
    pub tenant: String,
    pub data: Vec<u8>,
    pub metadata: HashMap<String, Vec<u8>>,
}

/// The blob/key store boundary the batching codec delegates to. Concrete
/// encryption or blob-store implementations live outside the core; this
/// trait is the entire surface they must satisfy.
#[async_trait]
pub trait ExternalStore: Send + Sync {
    async fn write_batch(&self, tenant: &str, records: Vec<ExternalRecord>) -> Result<()>;
    async fn read_batch(&self, tenant: &str, ids: Vec<String>) -> Result<HashMap<String, Vec<u8>>>;
}

/// An in-memory demo store, suitable for tests and the bundled fixture
/// service. A real deployment supplies its own `ExternalStore`.
#[derive(Debug, Default)]
pub struct InMemoryExternalStore {
    records: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ExternalStore for InMemoryExternalStore {
    async fn write_batch(&self, _tenant: &str, records: Vec<ExternalRecord>) -> Result<()> {
        let mut guard = self.records.lock().expect("in-memory store lock poisoned");
        for record in records {
            guard.insert(record.id, record.data);
        }
        Ok(())
    }

    async fn read_batch(&self, _tenant: &str, ids: Vec<String>) -> Result<HashMap<String, Vec<u8>>> {
        let guard = self.records.lock().expect("in-memory store lock poisoned");
        Ok(ids
            .into_iter()
            .filter_map(|id| guard.get(&id).cloned().map(|data| (id, data)))
            .collect())
    }
}

#[derive(Debug, Clone)]
struct PendingEntry {
    tenant: String,
}

/// The codec the pipeline's second inbound pass drives. Shares the
/// pending and resolved-data tables with the [`BatchingCodec`] that
/// registered it; never constructed directly by callers.
///
/// The pipeline runs this over every payload field of the response, not
/// just the ones this call externalized, so it must leave genuine
/// passthrough payloads (real data this call never touched) untouched
/// rather than treating their data as an identifier to look up.
struct ResolvedDataPatcher {
    pending: Arc<Mutex<HashMap<String, PendingEntry>>>,
    resolved: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

#[async_trait]
impl PayloadCodec for ResolvedDataPatcher {
    async fn transform(&self, _direction: Direction, ctx: &PayloadContext, bytes: Vec<u8>) -> Result<Vec<u8>> {
        let mut payload = Payload::decode(bytes.as_slice())
            .map_err(|e| ProxyError::codec(ctx.field_path.clone(), DecodeError(e.to_string())))?;
        let id = String::from_utf8_lossy(&payload.data).to_string();

        let is_pending = self.pending.lock().expect("pending table lock poisoned").contains_key(&id);
        if !is_pending {
            return Ok(bytes);
        }

        let resolved = self.resolved.lock().expect("resolved table lock poisoned");
        let data = resolved
            .get(&id)
            .cloned()
            .ok_or_else(|| ProxyError::codec(ctx.field_path.clone(), MissingIdentifierError(id.clone())))?;
        payload.data = data;
        Ok(payload.encode_to_vec())
    }
}

/// Per-call reference implementation of the batching codec contract.
/// Implementers must construct a fresh instance per call (or reset an
/// existing one via `init`/`finish`) -- this type holds no process-global
/// state and is never shared across calls.
pub struct BatchingCodec {
    store: Arc<dyn ExternalStore>,
    outbound_buffer: Mutex<Vec<ExternalRecord>>,
    pending: Arc<Mutex<HashMap<String, PendingEntry>>>,
    resolved: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    patcher: ResolvedDataPatcher,
    outbound_open: std::sync::atomic::AtomicBool,
    inbound_open: std::sync::atomic::AtomicBool,
}

impl BatchingCodec {
    pub fn new(store: Arc<dyn ExternalStore>) -> Self {
        let pending = Arc::new(Mutex::new(HashMap::new()));
        let resolved = Arc::new(Mutex::new(HashMap::new()));
        let patcher = ResolvedDataPatcher {
            pending: Arc::clone(&pending),
            resolved: Arc::clone(&resolved),
        };
        BatchingCodec {
            store,
            outbound_buffer: Mutex::new(Vec::new()),
            pending,
            resolved,
            patcher,
            outbound_open: std::sync::atomic::AtomicBool::new(false),
            inbound_open: std::sync::atomic::AtomicBool::new(false),
        }
    }

    async fn transform_outbound(&self, ctx: &PayloadContext, bytes: Vec<u8>) -> Result<Vec<u8>> {
        if !self.outbound_open.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ProxyError::Lifecycle("transform(outbound) called outside an open Init..Finish scope".into()));
        }
        let mut payload = Payload::decode(bytes.as_slice())
            .map_err(|e| ProxyError::codec(ctx.field_path.clone(), DecodeError(e.to_string())))?;

        let id = Uuid::new_v4().to_string();
        let mut metadata = payload.metadata.clone();
        if let Some(original_encoding) = metadata.remove(ENCODING_KEY) {
            metadata.insert(ENCODING_ORIGINAL_KEY.to_string(), original_encoding);
        }
        metadata.insert(ENCODING_KEY.to_string(), SENTINEL_ENCODING.as_bytes().to_vec());
        metadata.insert(IDENTIFIER_KEY.to_string(), id.as_bytes().to_vec());

        self.outbound_buffer.lock().expect("outbound buffer lock poisoned").push(ExternalRecord {
            id: id.clone(),
            tenant: ctx.tenant.clone(),
            data: std::mem::take(&mut payload.data),
            metadata: payload.metadata.clone(),
        });

        payload.metadata = metadata;
        payload.data = Vec::new();
        Ok(payload.encode_to_vec())
    }

    async fn transform_inbound(&self, ctx: &PayloadContext, bytes: Vec<u8>) -> Result<Vec<u8>> {
        if !self.inbound_open.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ProxyError::Lifecycle("transform(inbound) called outside an open Init..Finish scope".into()));
        }
        let payload = Payload::decode(bytes.as_slice())
            .map_err(|e| ProxyError::codec(ctx.field_path.clone(), DecodeError(e.to_string())))?;

        let is_sentinel = payload
            .metadata
            .get(ENCODING_KEY)
            .map(|v| v.as_slice() == SENTINEL_ENCODING.as_bytes())
            .unwrap_or(false);
        if !is_sentinel {
            return Ok(bytes);
        }

        let id = payload
            .metadata
            .get(IDENTIFIER_KEY)
            .map(|v| String::from_utf8_lossy(v).to_string())
            .ok_or_else(|| ProxyError::codec(ctx.field_path.clone(), MissingIdentifierError("<none>".into())))?;

        let mut shell = payload.metadata.clone();
        shell.remove(IDENTIFIER_KEY);
        shell.remove(ENCODING_KEY);
        if let Some(original_encoding) = shell.remove(ENCODING_ORIGINAL_KEY) {
            shell.insert(ENCODING_KEY.to_string(), original_encoding);
        }

        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .insert(id.clone(), PendingEntry { tenant: ctx.tenant.clone() });

        let placeholder = Payload {
            metadata: shell,
            data: id.into_bytes(),
        };
        Ok(placeholder.encode_to_vec())
    }
}

#[async_trait]
impl PayloadCodec for BatchingCodec {
    async fn transform(&self, direction: Direction, ctx: &PayloadContext, bytes: Vec<u8>) -> Result<Vec<u8>> {
        match direction {
            Direction::Outbound => self.transform_outbound(ctx, bytes).await,
            Direction::Inbound => self.transform_inbound(ctx, bytes).await,
        }
    }

    fn has_lifecycle(&self) -> bool {
        true
    }

    async fn init(&self, direction: Direction) -> Result<()> {
        match direction {
            Direction::Outbound => {
                if self.outbound_open.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    return Err(ProxyError::Lifecycle("init(outbound) called twice for the same scope".into()));
                }
                self.outbound_buffer.lock().expect("outbound buffer lock poisoned").clear();
            }
            Direction::Inbound => {
                if self.inbound_open.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    return Err(ProxyError::Lifecycle("init(inbound) called twice for the same scope".into()));
                }
                self.pending.lock().expect("pending table lock poisoned").clear();
                self.resolved.lock().expect("resolved table lock poisoned").clear();
            }
        }
        Ok(())
    }

    async fn finish(&self, direction: Direction) -> Result<()> {
        match direction {
            Direction::Outbound => {
                self.outbound_open.store(false, std::sync::atomic::Ordering::SeqCst);
                let buffer = std::mem::take(&mut *self.outbound_buffer.lock().expect("outbound buffer lock poisoned"));
                let mut by_tenant: HashMap<String, Vec<ExternalRecord>> = HashMap::new();
                for record in buffer {
                    by_tenant.entry(record.tenant.clone()).or_default().push(record);
                }
                for (tenant, records) in by_tenant {
                    self.store.write_batch(&tenant, records).await?;
                }
                Ok(())
            }
            Direction::Inbound => {
                self.inbound_open.store(false, std::sync::atomic::Ordering::SeqCst);
                let pending = self.pending.lock().expect("pending table lock poisoned").clone();
                let mut ids_by_tenant: HashMap<String, Vec<String>> = HashMap::new();
                for (id, entry) in &pending {
                    ids_by_tenant.entry(entry.tenant.clone()).or_default().push(id.clone());
                }
                let mut collected: HashMap<String, Vec<u8>> = HashMap::new();
                for (tenant, ids) in ids_by_tenant {
                    let batch = self.store.read_batch(&tenant, ids).await?;
                    collected.extend(batch);
                }
                self.resolved
                    .lock()
                    .expect("resolved table lock poisoned")
                    .extend(collected);
                Ok(())
            }
        }
    }

    /// Returns the codec the pipeline must drive as a second rewrite pass
    /// after `finish(Inbound)`, to splice resolved data into the
    /// placeholders `transform(Inbound, ...)` left behind.
    fn deferred_resolution(&self) -> Option<&(dyn PayloadCodec + Sync)> {
        Some(&self.patcher)
    }
}

#[derive(Debug)]
struct DecodeError(String);
impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed payload submessage: {}", self.0)
    }
}
impl std::error::Error for DecodeError {}

#[derive(Debug)]
struct MissingIdentifierError(String);
impl std::fmt::Display for MissingIdentifierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no external record for identifier '{}'", self.0)
    }
}
impl std::error::Error for MissingIdentifierError {}
