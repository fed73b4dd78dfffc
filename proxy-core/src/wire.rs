//! Wire rewriter.
//!
//! Walks a serialized protobuf message left-to-right, one tag at a time,
//! and substitutes payload field bodies via a [`PayloadCodec`]. Every byte
//! not touched by a classified field is copied from the input exactly as
//! it was encoded -- including non-minimal varints and oversized fixed
//! widths a pedantic re-encoder would "normalize" away -- so unrelated
//! fields always pass through byte-identical.

use std::ops::Range;

use async_recursion::async_recursion;
use prost_reflect::Kind;

use crate::error::{ProxyError, Result};
use crate::index::PayloadFieldIndex;
use crate::payload_codec::{Direction, PayloadCodec, PayloadContext};
use crate::payload_model::{PAYLOADS_REPEATED_FIELD_NUMBER, PAYLOADS_WRAPPER_TYPE};
use crate::store::DescriptorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireKind {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireKind {
    fn from_wire_type(wire_type: u64, offset: usize) -> Result<Self> {
        match wire_type {
            0 => Ok(WireKind::Varint),
            1 => Ok(WireKind::Fixed64),
            2 => Ok(WireKind::LengthDelimited),
            5 => Ok(WireKind::Fixed32),
            other => Err(ProxyError::wire_format(offset, format!("unrecognized wire kind {other}"))),
        }
    }
}

/// Rewrite a single serialized message of `type_name`, dispatching payload
/// fields to `codec` and recursing into transitively-interesting
/// submessages. Fields outside the payload index are copied byte-for-byte.
#[async_recursion]
pub async fn rewrite(
    store: &DescriptorStore,
    index: &PayloadFieldIndex,
    codec: &(dyn PayloadCodec + Sync),
    direction: Direction,
    tenant: &str,
    type_name: &str,
    bytes: &[u8],
) -> Result<Vec<u8>> {
    if !index.message_has_payloads(type_name) {
        return Ok(bytes.to_vec());
    }

    let message = store
        .lookup_message(type_name)
        .ok_or_else(|| ProxyError::wire_format(0, format!("unknown message type '{type_name}' during rewrite")))?;

    let mut out = Vec::with_capacity(bytes.len());
    let mut pos = 0usize;

    while pos < bytes.len() {
        let tag_start = pos;
        let (tag, tag_range) = read_varint_raw(bytes, &mut pos)?;
        if tag == 0 {
            break;
        }
        let field_number = (tag >> 3) as u32;
        let wire_type = tag & 0x7;
        out.extend_from_slice(&bytes[tag_range]);

        if index.is_payload(type_name, field_number) {
            if wire_type != 2 {
                return Err(ProxyError::wire_format(
                    tag_start,
                    format!("direct payload field {field_number} is not length-delimited"),
                ));
            }
            let body = read_length_delimited_body(bytes, &mut pos)?;
            let field = message.get_field(field_number);
            let field_name = field
                .as_ref()
                .map(|f| f.name().to_string())
                .unwrap_or_else(|| field_number.to_string());
            let is_wrapper = matches!(
                field.as_ref().map(|f| f.kind()),
                Some(Kind::Message(target)) if target.full_name() == PAYLOADS_WRAPPER_TYPE
            );

            let rewritten = if is_wrapper {
                rewrite_wrapper(codec, direction, tenant, &field_name, body).await?
            } else {
                let ctx = PayloadContext::new(tenant, field_name);
                codec.transform(direction, &ctx, body.to_vec()).await?
            };
            write_length_delimited(&rewritten, &mut out);
        } else if index.has_transitive_payloads(type_name, field_number) {
            if wire_type != 2 {
                return Err(ProxyError::wire_format(
                    tag_start,
                    format!("transitive field {field_number} is not length-delimited"),
                ));
            }
            let body = read_length_delimited_body(bytes, &mut pos)?;
            let target_type = index
                .transitive_target_type(type_name, field_number)
                .ok_or_else(|| ProxyError::wire_format(tag_start, "missing transitive target type"))?
                .to_string();
            let rewritten = rewrite(store, index, codec, direction, tenant, &target_type, body).await?;
            write_length_delimited(&rewritten, &mut out);
        } else {
            let kind = WireKind::from_wire_type(wire_type, tag_start)?;
            copy_field_value(bytes, &mut pos, kind, &mut out)?;
        }
    }

    Ok(out)
}

/// The repeated payload wrapper's sub-walker. Treats only field
/// number 1 (length-delimited) specially; everything else is copied
/// verbatim without ever materializing the wrapper as a message.
async fn rewrite_wrapper(
    codec: &(dyn PayloadCodec + Sync),
    direction: Direction,
    tenant: &str,
    outer_field_name: &str,
    bytes: &[u8],
) -> Result<Vec<u8>> {
    let field_path = format!("{outer_field_name}[]");
    let mut out = Vec::with_capacity(bytes.len());
    let mut pos = 0usize;

    while pos < bytes.len() {
        let tag_start = pos;
        let (tag, tag_range) = read_varint_raw(bytes, &mut pos)?;
        if tag == 0 {
            break;
        }
        let field_number = (tag >> 3) as u32;
        let wire_type = tag & 0x7;
        out.extend_from_slice(&bytes[tag_range]);

        if field_number == PAYLOADS_REPEATED_FIELD_NUMBER && wire_type == 2 {
            let body = read_length_delimited_body(bytes, &mut pos)?;
            let ctx = PayloadContext::new(tenant, field_path.clone());
            let rewritten = codec.transform(direction, &ctx, body.to_vec()).await?;
            write_length_delimited(&rewritten, &mut out);
        } else {
            let kind = WireKind::from_wire_type(wire_type, tag_start)?;
            copy_field_value(bytes, &mut pos, kind, &mut out)?;
        }
    }

    Ok(out)
}

/// Read a varint, enforcing the 10-byte limit for a 64-bit value. Returns
/// the decoded value and the exact byte range it occupied, so callers that
/// need byte-identical passthrough can copy the range instead of
/// re-encoding the value.
fn read_varint_raw(bytes: &[u8], pos: &mut usize) -> Result<(u64, Range<usize>)> {
    let start = *pos;
    let mut value: u64 = 0;
    let mut shift: u32 = 0;

    for i in 0..10 {
        if *pos >= bytes.len() {
            return Err(ProxyError::wire_format(start, "truncated varint"));
        }
        let byte = bytes[*pos];
        *pos += 1;
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, start..*pos));
        }
        shift += 7;
        let _ = i;
    }
    Err(ProxyError::wire_format(start, "varint exceeds 10 bytes"))
}

fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            out.push(byte | 0x80);
        } else {
            out.push(byte);
            break;
        }
    }
}

fn write_length_delimited(data: &[u8], out: &mut Vec<u8>) {
    write_varint(data.len() as u64, out);
    out.extend_from_slice(data);
}

/// Read a length-delimited field's body, advancing `pos` past it. Used
/// where the body is about to be processed (transformed or recursed into)
/// rather than copied, so only the body slice -- not the length prefix's
/// raw bytes -- is needed.
fn read_length_delimited_body<'a>(bytes: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let (len, _) = read_varint_raw(bytes, pos)?;
    let start = *pos;
    let end = start
        .checked_add(len as usize)
        .ok_or_else(|| ProxyError::wire_format(start, "length-delimited field length overflows"))?;
    if end > bytes.len() {
        return Err(ProxyError::wire_format(start, "length-delimited field runs past end of buffer"));
    }
    *pos = end;
    Ok(&bytes[start..end])
}

/// Copy one field value verbatim, choosing the read width by wire kind.
fn copy_field_value(bytes: &[u8], pos: &mut usize, kind: WireKind, out: &mut Vec<u8>) -> Result<()> {
    match kind {
        WireKind::Varint => {
            let (_, range) = read_varint_raw(bytes, pos)?;
            out.extend_from_slice(&bytes[range]);
        }
        WireKind::Fixed64 => {
            let start = *pos;
            let end = start
                .checked_add(8)
                .ok_or_else(|| ProxyError::wire_format(start, "fixed64 field overflows"))?;
            if end > bytes.len() {
                return Err(ProxyError::wire_format(start, "fixed64 field runs past end of buffer"));
            }
            out.extend_from_slice(&bytes[start..end]);
            *pos = end;
        }
        WireKind::LengthDelimited => {
            let len_start = *pos;
            let (len, len_range) = read_varint_raw(bytes, pos)?;
            let start = *pos;
            let end = start
                .checked_add(len as usize)
                .ok_or_else(|| ProxyError::wire_format(len_start, "length-delimited field length overflows"))?;
            if end > bytes.len() {
                return Err(ProxyError::wire_format(start, "length-delimited field runs past end of buffer"));
            }
            out.extend_from_slice(&bytes[len_range]);
            out.extend_from_slice(&bytes[start..end]);
            *pos = end;
        }
        WireKind::Fixed32 => {
            let start = *pos;
            let end = start
                .checked_add(4)
                .ok_or_else(|| ProxyError::wire_format(start, "fixed32 field overflows"))?;
            if end > bytes.len() {
                return Err(ProxyError::wire_format(start, "fixed32 field runs past end of buffer"));
            }
            out.extend_from_slice(&bytes[start..end]);
            *pos = end;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexConfig, PayloadFieldIndex};
    use crate::payload_model;
    use async_trait::async_trait;
    use prost::Message;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct UppercaseCodec {
        calls: AtomicUsize,
        observed_paths: Mutex<Vec<String>>,
    }

    impl UppercaseCodec {
        fn new() -> Self {
            UppercaseCodec {
                calls: AtomicUsize::new(0),
                observed_paths: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PayloadCodec for UppercaseCodec {
        async fn transform(&self, _direction: Direction, ctx: &PayloadContext, bytes: Vec<u8>) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.observed_paths.lock().unwrap().push(ctx.field_path.clone());
            Ok(bytes.to_ascii_uppercase())
        }
    }

    struct IdentityCodec;

    #[async_trait]
    impl PayloadCodec for IdentityCodec {
        async fn transform(&self, _direction: Direction, _ctx: &PayloadContext, bytes: Vec<u8>) -> Result<Vec<u8>> {
            Ok(bytes)
        }
    }

    fn field(name: &str, number: i32, type_name: &str) -> prost_types::FieldDescriptorProto {
        prost_types::FieldDescriptorProto {
            name: Some(name.into()),
            number: Some(number),
            r#type: Some(11),
            label: Some(1),
            type_name: Some(type_name.into()),
            ..Default::default()
        }
    }

    fn scalar(name: &str, number: i32) -> prost_types::FieldDescriptorProto {
        prost_types::FieldDescriptorProto {
            name: Some(name.into()),
            number: Some(number),
            r#type: Some(9),
            label: Some(1),
            ..Default::default()
        }
    }

    fn build_store_and_index(
        messages: Vec<prost_types::DescriptorProto>,
    ) -> (DescriptorStore, PayloadFieldIndex) {
        let fds = prost_types::FileDescriptorSet {
            file: vec![
                payload_model::file_descriptor_proto(),
                prost_types::FileDescriptorProto {
                    name: Some("workflow.proto".into()),
                    package: Some("workflow.v1".into()),
                    dependency: vec!["payload.proto".into()],
                    message_type: messages,
                    syntax: Some("proto3".into()),
                    ..Default::default()
                },
            ],
        };
        let store = DescriptorStore::load(&fds.encode_to_vec()).unwrap();
        let index = PayloadFieldIndex::build(
            &store,
            &IndexConfig {
                scan_package_prefix: "workflow.".into(),
                exclude_indexed_attributes_container: false,
                indexed_attributes_container_type: None,
            },
        );
        (store, index)
    }

    fn encode_payload(metadata: &[(&str, &str)], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for (k, v) in metadata {
            let mut entry = Vec::new();
            write_tagged_string(&mut entry, 1, k);
            write_tagged_bytes(&mut entry, 2, v.as_bytes());
            write_varint((1u64 << 3) | 2, &mut out);
            write_length_delimited(&entry, &mut out);
        }
        write_varint((2u64 << 3) | 2, &mut out);
        write_length_delimited(data, &mut out);
        out
    }

    fn write_tagged_string(out: &mut Vec<u8>, number: u64, value: &str) {
        write_varint((number << 3) | 2, out);
        write_length_delimited(value.as_bytes(), out);
    }

    fn write_tagged_bytes(out: &mut Vec<u8>, number: u64, value: &[u8]) {
        write_varint((number << 3) | 2, out);
        write_length_delimited(value, out);
    }

    #[tokio::test]
    async fn fast_path_passes_through_non_payload_messages_unchanged() {
        let (store, index) = build_store_and_index(vec![prost_types::DescriptorProto {
            name: Some("Empty".into()),
            field: vec![scalar("name", 1)],
            ..Default::default()
        }]);
        let codec = IdentityCodec;
        let input = b"\x0a\x03abc".to_vec();
        let out = rewrite(&store, &index, &codec, Direction::Outbound, "t1", "workflow.v1.Empty", &input)
            .await
            .unwrap();
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn direct_payload_wrapper_is_transformed_and_siblings_preserved() {
        let (store, index) = build_store_and_index(vec![prost_types::DescriptorProto {
            name: Some("StartRequest".into()),
            field: vec![scalar("workflow_id", 1), field("input", 4, ".payloadproxy.v1.Payloads")],
            ..Default::default()
        }]);

        let payload = encode_payload(&[("encoding", "json/plain")], b"hello");
        let mut wrapper = Vec::new();
        write_varint((PAYLOADS_REPEATED_FIELD_NUMBER as u64) << 3 | 2, &mut wrapper);
        write_length_delimited(&payload, &mut wrapper);

        let mut workflow_id_field = Vec::new();
        write_tagged_string(&mut workflow_id_field, 1, "test-workflow-123");

        let mut message = Vec::new();
        message.extend_from_slice(&workflow_id_field);
        write_varint((4u64 << 3) | 2, &mut message);
        write_length_delimited(&wrapper, &mut message);

        let codec = UppercaseCodec::new();
        let out = rewrite(&store, &index, &codec, Direction::Outbound, "t1", "workflow.v1.StartRequest", &message)
            .await
            .unwrap();

        assert_eq!(codec.calls.load(Ordering::SeqCst), 1);
        assert_eq!(codec.observed_paths.lock().unwrap().as_slice(), &["input[]".to_string()]);

        // workflow_id field bytes are untouched and still precede the rewritten wrapper.
        assert!(out.starts_with(&workflow_id_field));
        assert_ne!(out, message);
    }

    #[tokio::test]
    async fn repeated_wrapper_entries_preserve_order_and_count() {
        let (store, index) = build_store_and_index(vec![prost_types::DescriptorProto {
            name: Some("StartRequest".into()),
            field: vec![field("input", 4, ".payloadproxy.v1.Payloads")],
            ..Default::default()
        }]);

        let mut wrapper = Vec::new();
        for i in 0..10u8 {
            let payload = encode_payload(&[], format!("msg-{i}").as_bytes());
            write_varint((PAYLOADS_REPEATED_FIELD_NUMBER as u64) << 3 | 2, &mut wrapper);
            write_length_delimited(&payload, &mut wrapper);
        }
        let mut message = Vec::new();
        write_varint((4u64 << 3) | 2, &mut message);
        write_length_delimited(&wrapper, &mut message);

        let codec = UppercaseCodec::new();
        rewrite(&store, &index, &codec, Direction::Outbound, "t1", "workflow.v1.StartRequest", &message)
            .await
            .unwrap();

        assert_eq!(codec.calls.load(Ordering::SeqCst), 10);
        let paths = codec.observed_paths.lock().unwrap();
        assert!(paths.iter().all(|p| p == "input[]"));
    }

    #[tokio::test]
    async fn transitive_field_recurses_and_unrelated_sibling_is_preserved() {
        let (store, index) = build_store_and_index(vec![
            prost_types::DescriptorProto {
                name: Some("UpdateRequest".into()),
                field: vec![
                    scalar("first_execution_run_id", 1),
                    field("request", 2, ".workflow.v1.Request"),
                ],
                ..Default::default()
            },
            prost_types::DescriptorProto {
                name: Some("Request".into()),
                field: vec![field("args", 1, ".payloadproxy.v1.Payload")],
                ..Default::default()
            },
        ]);

        let payload = encode_payload(&[], b"args-bytes");
        let mut request = Vec::new();
        write_varint((1u64 << 3) | 2, &mut request);
        write_length_delimited(&payload, &mut request);

        let mut message = Vec::new();
        write_tagged_string(&mut message, 1, "run-id-abc");
        write_varint((2u64 << 3) | 2, &mut message);
        write_length_delimited(&request, &mut message);

        let codec = UppercaseCodec::new();
        let out = rewrite(&store, &index, &codec, Direction::Outbound, "t1", "workflow.v1.UpdateRequest", &message)
            .await
            .unwrap();

        assert_eq!(codec.calls.load(Ordering::SeqCst), 1);
        let run_id_prefix_len = 2 + "run-id-abc".len();
        assert_eq!(&out[..run_id_prefix_len], &message[..run_id_prefix_len]);
    }

    #[tokio::test]
    async fn unknown_field_on_payload_bearing_type_passes_through_identical() {
        let (store, index) = build_store_and_index(vec![prost_types::DescriptorProto {
            name: Some("StartRequest".into()),
            field: vec![field("input", 4, ".payloadproxy.v1.Payload")],
            ..Default::default()
        }]);

        // Field number 99 is not declared anywhere in the descriptor.
        let mut message = Vec::new();
        write_tagged_string(&mut message, 99, "mystery");
        let payload = encode_payload(&[], b"hi");
        write_varint((4u64 << 3) | 2, &mut message);
        write_length_delimited(&payload, &mut message);

        let codec = IdentityCodec;
        let out = rewrite(&store, &index, &codec, Direction::Outbound, "t1", "workflow.v1.StartRequest", &message)
            .await
            .unwrap();
        assert_eq!(out, message);
    }

    #[tokio::test]
    async fn round_trip_with_identity_codec_is_exact() {
        let (store, index) = build_store_and_index(vec![prost_types::DescriptorProto {
            name: Some("StartRequest".into()),
            field: vec![scalar("workflow_id", 1), field("input", 4, ".payloadproxy.v1.Payloads")],
            ..Default::default()
        }]);

        let payload = encode_payload(&[("encoding", "json/plain")], b"hello world");
        let mut wrapper = Vec::new();
        write_varint((PAYLOADS_REPEATED_FIELD_NUMBER as u64) << 3 | 2, &mut wrapper);
        write_length_delimited(&payload, &mut wrapper);
        let mut message = Vec::new();
        write_tagged_string(&mut message, 1, "wf-1");
        write_varint((4u64 << 3) | 2, &mut message);
        write_length_delimited(&wrapper, &mut message);

        let codec = IdentityCodec;
        let out = rewrite(&store, &index, &codec, Direction::Outbound, "t1", "workflow.v1.StartRequest", &message)
            .await
            .unwrap();
        let back = rewrite(&store, &index, &codec, Direction::Inbound, "t1", "workflow.v1.StartRequest", &out)
            .await
            .unwrap();
        assert_eq!(back, message);
    }

    #[tokio::test]
    async fn truncated_varint_is_a_wire_format_error() {
        let (store, index) = build_store_and_index(vec![prost_types::DescriptorProto {
            name: Some("StartRequest".into()),
            field: vec![field("input", 4, ".payloadproxy.v1.Payload")],
            ..Default::default()
        }]);
        let codec = IdentityCodec;
        let truncated = vec![0x80, 0x80, 0x80];
        let err = rewrite(&store, &index, &codec, Direction::Outbound, "t1", "workflow.v1.StartRequest", &truncated)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::WireFormat { .. }));
    }

    #[tokio::test]
    async fn length_delimited_overrun_is_a_wire_format_error() {
        let (store, index) = build_store_and_index(vec![prost_types::DescriptorProto {
            name: Some("StartRequest".into()),
            field: vec![field("input", 4, ".payloadproxy.v1.Payload")],
            ..Default::default()
        }]);
        let codec = IdentityCodec;
        let mut message = Vec::new();
        write_varint((4u64 << 3) | 2, &mut message);
        write_varint(1000, &mut message); // claims 1000 bytes but provides none
        let err = rewrite(&store, &index, &codec, Direction::Outbound, "t1", "workflow.v1.StartRequest", &message)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::WireFormat { .. }));
    }
}
