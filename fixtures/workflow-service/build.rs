fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR")?);

    let file_descriptor_set = protox::compile(
        ["proto/workflow.proto"],
        ["proto", "../../proxy-core/proto"],
    )?;
    std::fs::write(
        out_dir.join("workflow_descriptor.bin"),
        prost::Message::encode_to_vec(&file_descriptor_set),
    )?;

    tonic_prost_build::configure().compile_fds(file_descriptor_set)?;

    Ok(())
}
