//! Build-time detection for 32-bit ARM targets.
//!
//! The ARM backend stores a resume address that is later entered with a BX,
//! so it must know whether the crate is being compiled to the Thumb
//! instruction set: a Thumb resume address needs its interworking bit set.

use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rustc-check-cfg=cfg(is_thumb)");

    // We only care about ARM.
    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap();
    if arch != "arm" {
        return;
    }

    // The most reliable way is to check for the thumb-mode feature in
    // CARGO_CFG_TARGET_FEATURE but this is only available on nightly. As a
    // fallback we just check if the target name starts with "thumb".
    let is_thumb = if let Ok(target_features) = env::var("CARGO_CFG_TARGET_FEATURE") {
        target_features.split(',').any(|s| s == "thumb-mode")
    } else {
        let target = env::var("TARGET").unwrap();
        target.starts_with("thumb")
    };
    if is_thumb {
        println!("cargo:rustc-cfg=is_thumb");
    }
}
