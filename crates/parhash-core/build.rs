/// Builds the gRPC client and server code for `hashsvc.proto` and
/// `parhash.proto` using `tonic-prost-build`.
///
/// # Byte Field Optimization
///
/// Every `bytes` field (including `repeated bytes`) is generated as
/// [`bytes::Bytes`] instead of `Vec<u8>`. Buffers received from a client are
/// forwarded to a backend as-is, so a `Bytes` handle lets the dispatcher hand
/// each buffer to its task without copying it.
///
/// # Files and Paths
///
/// - Proto files: `proto/hashsvc.proto`, `proto/parhash.proto`
/// - Includes: `proto/`
/// - Descriptor set: `$OUT_DIR/parhash_descriptor.bin` (served by reflection)
///
/// # Output
///
/// ```rust,ignore
/// pub mod hashsvc {
///     tonic::include_proto!("hashsvc");
/// }
/// pub mod parhash {
///     tonic::include_proto!("parhash");
/// }
/// ```
use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let descriptor_path = out_dir.join("parhash_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config
        .bytes(["."])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure().compile_with_config(
        config,
        &["proto/hashsvc.proto", "proto/parhash.proto"],
        &["proto"],
    )?;

    println!("cargo:rerun-if-changed=proto");
    Ok(())
}
