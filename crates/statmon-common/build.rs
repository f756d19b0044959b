//! Generates the gRPC client and server stubs for the bulk-report service.
//! The messages live in `src/proto.rs`, so no `.proto` compiler is needed.

fn main() {
    let bulk_save = tonic_build::manual::Method::builder()
        .name("bulk_save_metrics")
        .route_name("BulkSaveMetrics")
        .input_type("crate::proto::BulkSaveRequest")
        .output_type("crate::proto::BulkSaveResponse")
        .codec_path("tonic::codec::ProstCodec")
        .build();

    let metrics = tonic_build::manual::Service::builder()
        .name("Metrics")
        .package("statmon")
        .method(bulk_save)
        .build();

    tonic_build::manual::Builder::new().compile(&[metrics]);
    println!("cargo:rerun-if-changed=build.rs");
}
