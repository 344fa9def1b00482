fn main() {
    let proto_file = "proto/review_engagement.proto";
    println!("cargo:rerun-if-changed={proto_file}");
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&[proto_file], &["proto"])
        .expect("review engagement proto compilation must succeed");
}
