//! Descriptor store.
//!
//! An immutable, process-scoped index over a compiled file-descriptor-set:
//! fully-qualified message name -> descriptor, and
//! `"<service>/<method>"` -> `(request type, response type)`.
//!
//! Descriptor parsing and dependency-order validation is delegated to
//! `prost_reflect::DescriptorPool`, which already builds files in
//! topological order and fails the same way `Load` is specified to: a
//! dependency cycle or a missing dependency makes the pool unbuildable.

use std::sync::{Arc, RwLock};

use prost::Message;
use prost_reflect::{DescriptorPool, MessageDescriptor};

use crate::error::{ProxyError, Result};

/// The resolved request/response types (and streaming shape) for a service
/// method, keyed by its RPC path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMethodInfo {
    pub request_type_name: String,
    pub response_type_name: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

impl ServiceMethodInfo {
    /// Unary RPCs are the only shape the interception pipeline rewrites;
    /// anything else is passed through untouched.
    pub fn is_unary(&self) -> bool {
        !self.client_streaming && !self.server_streaming
    }
}

struct Inner {
    pool: DescriptorPool,
}

/// Process-global, read-after-init descriptor state. Cheap to clone (it's a
/// handle around an `Arc`-swapped pool); `reload` replaces the pool
/// atomically for all holders.
#[derive(Clone)]
pub struct DescriptorStore {
    inner: Arc<RwLock<Arc<Inner>>>,
}

impl DescriptorStore {
    /// Parse a serialized `FileDescriptorSet` and build the store.
    pub fn load(serialized_descriptor_set: &[u8]) -> Result<Self> {
        let pool = build_pool(serialized_descriptor_set)?;
        Ok(DescriptorStore {
            inner: Arc::new(RwLock::new(Arc::new(Inner { pool }))),
        })
    }

    /// Replace the store's state atomically. Existing `DescriptorStore`
    /// clones observe the new pool on their next lookup; in-flight lookups
    /// that already captured the old `Arc<Inner>` see a consistent
    /// pre-reload snapshot.
    pub fn reload(&self, serialized_descriptor_set: &[u8]) -> Result<()> {
        let pool = build_pool(serialized_descriptor_set)?;
        let mut guard = self.inner.write().expect("descriptor store lock poisoned");
        *guard = Arc::new(Inner { pool });
        Ok(())
    }

    fn snapshot(&self) -> Arc<Inner> {
        Arc::clone(&self.inner.read().expect("descriptor store lock poisoned"))
    }

    /// Resolve a method path of the form `"/<service>/<method>"` or
    /// `"<service>/<method>"`. A leading `/` is stripped; any other shape,
    /// or an unknown service/method, yields `None` -- never an error.
    pub fn lookup_method(&self, path: &str) -> Option<ServiceMethodInfo> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let (service_name, method_name) = trimmed.split_once('/')?;
        if service_name.is_empty() || method_name.is_empty() {
            return None;
        }

        let snapshot = self.snapshot();
        let service = snapshot.pool.get_service_by_name(service_name)?;
        let method = service.methods().find(|m| m.name() == method_name)?;

        Some(ServiceMethodInfo {
            request_type_name: method.input().full_name().to_string(),
            response_type_name: method.output().full_name().to_string(),
            client_streaming: method.is_client_streaming(),
            server_streaming: method.is_server_streaming(),
        })
    }

    /// Look up a message descriptor by fully-qualified name.
    pub fn lookup_message(&self, name: &str) -> Option<MessageDescriptor> {
        self.snapshot().pool.get_message_by_name(name)
    }

    /// Every file descriptor currently loaded, for index construction (C2)
    /// to walk.
    pub fn files(&self) -> Vec<prost_reflect::FileDescriptor> {
        self.snapshot().pool.files().collect()
    }
}

fn build_pool(serialized_descriptor_set: &[u8]) -> Result<DescriptorPool> {
    let fds = prost_types::FileDescriptorSet::decode(serialized_descriptor_set)
        .map_err(|e| ProxyError::DescriptorLoad(format!("malformed descriptor set: {e}")))?;

    DescriptorPool::from_file_descriptor_set(fds)
        .map_err(|e| ProxyError::DescriptorLoad(format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_descriptor_set() -> Vec<u8> {
        let fds = prost_types::FileDescriptorSet {
            file: vec![prost_types::FileDescriptorProto {
                name: Some("workflow.proto".into()),
                package: Some("workflow.v1".into()),
                message_type: vec![
                    prost_types::DescriptorProto {
                        name: Some("StartRequest".into()),
                        field: vec![prost_types::FieldDescriptorProto {
                            name: Some("workflow_id".into()),
                            number: Some(1),
                            r#type: Some(9),
                            label: Some(1),
                            ..Default::default()
                        }],
                        ..Default::default()
                    },
                    prost_types::DescriptorProto {
                        name: Some("StartResponse".into()),
                        ..Default::default()
                    },
                ],
                service: vec![prost_types::ServiceDescriptorProto {
                    name: Some("WorkflowService".into()),
                    method: vec![prost_types::MethodDescriptorProto {
                        name: Some("Start".into()),
                        input_type: Some(".workflow.v1.StartRequest".into()),
                        output_type: Some(".workflow.v1.StartResponse".into()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                syntax: Some("proto3".into()),
                ..Default::default()
            }],
        };
        fds.encode_to_vec()
    }

    #[test]
    fn lookup_method_with_leading_slash() {
        let store = DescriptorStore::load(&test_descriptor_set()).unwrap();
        let info = store
            .lookup_method("/workflow.v1.WorkflowService/Start")
            .unwrap();
        assert_eq!(info.request_type_name, "workflow.v1.StartRequest");
        assert_eq!(info.response_type_name, "workflow.v1.StartResponse");
        assert!(info.is_unary());
    }

    #[test]
    fn lookup_method_without_leading_slash() {
        let store = DescriptorStore::load(&test_descriptor_set()).unwrap();
        let info = store
            .lookup_method("workflow.v1.WorkflowService/Start")
            .unwrap();
        assert_eq!(info.request_type_name, "workflow.v1.StartRequest");
    }

    #[test]
    fn lookup_method_unknown_service_is_none_not_error() {
        let store = DescriptorStore::load(&test_descriptor_set()).unwrap();
        assert!(store.lookup_method("/does.not.Exist/Method").is_none());
    }

    #[test]
    fn lookup_method_malformed_path_is_none() {
        let store = DescriptorStore::load(&test_descriptor_set()).unwrap();
        assert!(store.lookup_method("not-a-path").is_none());
        assert!(store.lookup_method("/").is_none());
    }

    #[test]
    fn lookup_message_by_name() {
        let store = DescriptorStore::load(&test_descriptor_set()).unwrap();
        assert!(store.lookup_message("workflow.v1.StartRequest").is_some());
        assert!(store.lookup_message("workflow.v1.Nonexistent").is_none());
    }

    #[test]
    fn load_rejects_malformed_bytes() {
        let result = DescriptorStore::load(&[0xff, 0x00, 0x01]);
        assert!(result.is_err());
    }

    #[test]
    fn reload_replaces_state_atomically() {
        let store = DescriptorStore::load(&test_descriptor_set()).unwrap();
        assert!(store.lookup_message("workflow.v1.StartRequest").is_some());

        let empty_fds = prost_types::FileDescriptorSet { file: vec![] };
        store.reload(&empty_fds.encode_to_vec()).unwrap();
        assert!(store.lookup_message("workflow.v1.StartRequest").is_none());
    }
}
