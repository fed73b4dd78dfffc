fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR")?);

    let file_descriptor_set = protox::compile(["proto/payload.proto"], ["proto"])?;
    std::fs::write(
        out_dir.join("payload_descriptor.bin"),
        prost::Message::encode_to_vec(&file_descriptor_set),
    )?;

    prost_build::Config::new().compile_fds(file_descriptor_set)?;

    Ok(())
}
