fn main() {
    println!("cargo:rerun-if-changed=kernel.ld");

    // linker script for the kernel image; host builds (tests) link normally.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("none") {
        let dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
        println!("cargo:rustc-link-arg-bin=stride-os=--script={dir}/kernel.ld");
    }
}
