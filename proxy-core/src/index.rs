//! Payload field index.
//!
//! Precomputes, for every message type reachable from the configured scan
//! prefix, which fields carry payload data directly (the sentinel types `P`
//! and `Ps`) and which fields merely contain a payload somewhere in their
//! descendant graph (transitive). Built once at startup from the
//! `DescriptorStore`; read-only thereafter.

use std::collections::{HashMap, HashSet};

use prost_reflect::{FieldDescriptor, Kind, MessageDescriptor};

use crate::payload_model;
use crate::store::DescriptorStore;

/// Settings that shape index construction. `payload_type`/`payloads_wrapper_type`
/// are not configurable -- they are the proxy's own bundled sentinel
/// messages (see `payload_model`) -- but the scan scope and the indexed
/// attributes exclusion are deployment policy.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Only messages in files whose package begins with this prefix are
    /// walked for classification. Fields of other messages are never
    /// marked direct/transitive (but those messages remain resolvable via
    /// the descriptor store for method lookup).
    pub scan_package_prefix: String,

    /// When set, `indexed_attributes_container_type` is suppressed from the
    /// index as if it had no payload fields, transitively cutting off any
    /// path to a payload that passes only through it.
    pub exclude_indexed_attributes_container: bool,

    /// Fully-qualified name of the "indexed attributes container" (`SA`)
    /// sentinel type, e.g. `"workflow.v1.SearchAttributes"`.
    pub indexed_attributes_container_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Classification {
    Direct,
    Transitive { target_type: String },
}

/// The payload field index: O(1) hash lookups for everything except
/// `transformable_field_numbers`, which is O(fields-of-type).
#[derive(Debug, Default)]
pub struct PayloadFieldIndex {
    fields: HashMap<(String, u32), Classification>,
    types_with_payloads: HashSet<String>,
}

impl PayloadFieldIndex {
    pub fn build(store: &DescriptorStore, config: &IndexConfig) -> Self {
        let mut index = PayloadFieldIndex::default();

        let messages = collect_scanned_messages(store, &config.scan_package_prefix);
        for message in &messages {
            if config.exclude_indexed_attributes_container
                && config.indexed_attributes_container_type.as_deref() == Some(message.full_name())
            {
                // The container itself is treated as if it had no payload
                // fields at all, not just as unreachable through it.
                continue;
            }
            let mut any_entry = false;
            for field in message.fields() {
                if let Some(classification) = classify_field(store, &field, config) {
                    index
                        .fields
                        .insert((message.full_name().to_string(), field.number()), classification);
                    any_entry = true;
                }
            }
            if any_entry {
                index.types_with_payloads.insert(message.full_name().to_string());
            }
        }

        index
    }

    pub fn message_has_payloads(&self, message_name: &str) -> bool {
        self.types_with_payloads.contains(message_name)
    }

    pub fn is_payload(&self, message_name: &str, field_number: u32) -> bool {
        matches!(
            self.fields.get(&(message_name.to_string(), field_number)),
            Some(Classification::Direct)
        )
    }

    pub fn has_transitive_payloads(&self, message_name: &str, field_number: u32) -> bool {
        matches!(
            self.fields.get(&(message_name.to_string(), field_number)),
            Some(Classification::Transitive { .. })
        )
    }

    pub fn transitive_target_type(&self, message_name: &str, field_number: u32) -> Option<&str> {
        match self.fields.get(&(message_name.to_string(), field_number)) {
            Some(Classification::Transitive { target_type }) => Some(target_type.as_str()),
            _ => None,
        }
    }

    pub fn transformable_field_numbers(&self, store: &DescriptorStore, message_name: &str) -> HashSet<u32> {
        let Some(message) = store.lookup_message(message_name) else {
            return HashSet::new();
        };
        message
            .fields()
            .filter(|f| self.fields.contains_key(&(message_name.to_string(), f.number())))
            .map(|f| f.number())
            .collect()
    }
}

/// Walk every file whose package starts with `prefix`, collecting every
/// top-level and nested message descriptor declared in it.
fn collect_scanned_messages(store: &DescriptorStore, prefix: &str) -> Vec<MessageDescriptor> {
    let mut out = Vec::new();
    for file in store.files() {
        if !file.package_name().starts_with(prefix) {
            continue;
        }
        for message in file.messages() {
            collect_with_nested(message, &mut out);
        }
    }
    out
}

fn collect_with_nested(message: MessageDescriptor, out: &mut Vec<MessageDescriptor>) {
    for nested in message.child_messages() {
        collect_with_nested(nested, out);
    }
    out.push(message);
}

fn classify_field(
    store: &DescriptorStore,
    field: &FieldDescriptor,
    config: &IndexConfig,
) -> Option<Classification> {
    let target = match field.kind() {
        Kind::Message(target) => target,
        _ => return None,
    };
    let target_name = target.full_name().to_string();

    if target_name == payload_model::PAYLOAD_TYPE || target_name == payload_model::PAYLOADS_WRAPPER_TYPE {
        return Some(Classification::Direct);
    }

    let mut visited = HashSet::new();
    if has_payload_reachable(store, &target_name, config, &mut visited) {
        Some(Classification::Transitive { target_type: target_name })
    } else {
        None
    }
}

/// Cycle-safe reachability: a type already on the current recursion stack
/// contributes `false` to its own subquery rather than recursing forever.
/// This is the only place cycles are handled; descriptors themselves are
/// never mutated.
fn has_payload_reachable(
    store: &DescriptorStore,
    type_name: &str,
    config: &IndexConfig,
    visited: &mut HashSet<String>,
) -> bool {
    if visited.contains(type_name) {
        return false;
    }
    if config.exclude_indexed_attributes_container
        && config.indexed_attributes_container_type.as_deref() == Some(type_name)
    {
        return false;
    }
    visited.insert(type_name.to_string());

    let Some(message) = store.lookup_message(type_name) else {
        return false;
    };

    for field in message.fields() {
        let target = match field.kind() {
            Kind::Message(target) => target,
            _ => continue,
        };
        let target_name = target.full_name();
        if target_name == payload_model::PAYLOAD_TYPE || target_name == payload_model::PAYLOADS_WRAPPER_TYPE {
            return true;
        }
        if has_payload_reachable(store, target_name, config, visited) {
            return true;
        }
    }
    false
}
