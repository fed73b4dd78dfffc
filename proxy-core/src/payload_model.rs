//! The two sentinel message types compiled from `proto/payload.proto`:
//! `Payload` (`P`) and `Payloads` (`Ps`). Every other module identifies them
//! by fully-qualified name rather than depending on the generated Rust
//! types directly, since the wire rewriter (C3) works at the byte level and
//! never actually decodes them.

/// The singular opaque payload sentinel type.
pub const PAYLOAD_TYPE: &str = "payloadproxy.v1.Payload";

/// The repeated-payload wrapper sentinel type.
pub const PAYLOADS_WRAPPER_TYPE: &str = "payloadproxy.v1.Payloads";

/// Field number of `Payloads.payloads`, the only field the wire rewriter's
/// sub-walker needs to know about.
pub const PAYLOADS_REPEATED_FIELD_NUMBER: u32 = 1;

/// Field numbers of `Payload.metadata` and `Payload.data`.
pub const PAYLOAD_METADATA_FIELD_NUMBER: u32 = 1;
pub const PAYLOAD_DATA_FIELD_NUMBER: u32 = 2;

include!(concat!(env!("OUT_DIR"), "/payloadproxy.v1.rs"));

/// A hand-built `FileDescriptorProto` for `payload.proto`, matching the
/// compiled proto exactly. Used by other modules' tests to assemble a
/// `FileDescriptorSet` that depends on the sentinel types without shelling
/// out to `protoc` at test time.
#[cfg(test)]
pub fn file_descriptor_proto() -> prost_types::FileDescriptorProto {
    use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto};

    let metadata_entry = DescriptorProto {
        name: Some("MetadataEntry".into()),
        field: vec![
            FieldDescriptorProto {
                name: Some("key".into()),
                number: Some(1),
                r#type: Some(9), // TYPE_STRING
                label: Some(1),
                ..Default::default()
            },
            FieldDescriptorProto {
                name: Some("value".into()),
                number: Some(2),
                r#type: Some(12), // TYPE_BYTES
                label: Some(1),
                ..Default::default()
            },
        ],
        options: Some(prost_types::MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    };

    let payload = DescriptorProto {
        name: Some("Payload".into()),
        field: vec![
            FieldDescriptorProto {
                name: Some("metadata".into()),
                number: Some(PAYLOAD_METADATA_FIELD_NUMBER as i32),
                r#type: Some(11), // TYPE_MESSAGE
                label: Some(3),   // LABEL_REPEATED (map representation)
                type_name: Some(".payloadproxy.v1.Payload.MetadataEntry".into()),
                ..Default::default()
            },
            FieldDescriptorProto {
                name: Some("data".into()),
                number: Some(PAYLOAD_DATA_FIELD_NUMBER as i32),
                r#type: Some(12), // TYPE_BYTES
                label: Some(1),
                ..Default::default()
            },
        ],
        nested_type: vec![metadata_entry],
        ..Default::default()
    };

    let payloads = DescriptorProto {
        name: Some("Payloads".into()),
        field: vec![FieldDescriptorProto {
            name: Some("payloads".into()),
            number: Some(PAYLOADS_REPEATED_FIELD_NUMBER as i32),
            r#type: Some(11), // TYPE_MESSAGE
            label: Some(3),   // LABEL_REPEATED
            type_name: Some(".payloadproxy.v1.Payload".into()),
            ..Default::default()
        }],
        ..Default::default()
    };

    FileDescriptorProto {
        name: Some("payload.proto".into()),
        package: Some("payloadproxy.v1".into()),
        message_type: vec![payload, payloads],
        syntax: Some("proto3".into()),
        ..Default::default()
    }
}
