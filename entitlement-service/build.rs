fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR")?);

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(out_dir.join("entitlement_descriptor.bin"))
        .protoc_arg("--experimental_allow_proto3_optional")
        .compile_protos(
            &["../proto/marketplace/entitlement/v1/entitlement.proto"],
            &["../proto"],
        )?;

    println!("cargo:rerun-if-changed=../proto/marketplace/entitlement/v1/entitlement.proto");

    Ok(())
}
