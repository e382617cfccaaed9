fn main() -> Result<(), Box<dyn std::error::Error>> {
    // vendored protoc, no system install needed
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&["proto/needleware.proto"], &["proto"])?;
    Ok(())
}
