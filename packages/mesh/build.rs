// packages/mesh/build.rs
//! Build script for compiling Protocol Buffer definitions

use std::io::Result;
use std::path::PathBuf;

fn main() -> Result<()> {
    // Fall back to the vendored protoc when the host has none configured
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()))?;
        std::env::set_var("PROTOC", protoc);

        // Well-known types (google/protobuf/timestamp.proto)
        let include = protoc_bin_vendored::include_path()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()))?;
        std::env::set_var("PROTOC_INCLUDE", include);
    }

    let out_dir = PathBuf::from(std::env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    // Compile protobuf files
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .bytes(["."])
        .file_descriptor_set_path(out_dir.join("mesh_descriptor.bin"))
        .compile(&["proto/mesh.proto"], &["proto"])?;

    // Recompile if proto files change
    println!("cargo:rerun-if-changed=proto/mesh.proto");

    Ok(())
}
