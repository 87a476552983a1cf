fn main() {
    std::env::set_var(
        "PROTOC",
        protoc_bin_vendored::protoc_bin_path().unwrap(),
    );
    tonic_build::configure()
        .compile(&["proto/pinsync.proto"], &["proto"])
        .unwrap();
}
