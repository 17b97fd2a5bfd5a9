// build.rs

//! Build script for the mica_os kernel
//!
//! Runs at build time to validate the custom target specification and to
//! bake build information (profile, target, timestamp, commit) into the
//! kernel binary.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Deserialize)]
struct TargetSpec {
    #[serde(rename = "llvm-target")]
    llvm_target: String,
    #[serde(rename = "data-layout")]
    data_layout: String,
    arch: String,
    #[serde(
        rename = "target-pointer-width",
        deserialize_with = "deserialize_pointer_width"
    )]
    target_pointer_width: u16,
    #[serde(rename = "disable-redzone")]
    disable_redzone: bool,
    #[serde(rename = "panic-strategy")]
    panic_strategy: String,
}

fn deserialize_pointer_width<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PointerWidthRaw {
        Integer(u64),
        Text(String),
    }

    match PointerWidthRaw::deserialize(deserializer)? {
        PointerWidthRaw::Integer(value) => {
            u16::try_from(value).map_err(|_| de::Error::custom("target-pointer-width out of range"))
        }
        PointerWidthRaw::Text(text) => text.parse::<u16>().map_err(|_| {
            de::Error::custom(format!(
                "target-pointer-width must be numeric, received '{text}'"
            ))
        }),
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=targets/x86_64-mica_os.json");
    println!("cargo:rerun-if-changed=Cargo.toml");

    validate_target_spec();
    print_build_info();
}

/// Validate the custom target specification file
///
/// Ensures the target JSON is well-formed and contains the fields a
/// bare-metal kernel build depends on. Built-in host targets (used for the
/// `std-tests` test suite) carry no custom spec and are skipped.
fn validate_target_spec() {
    let target = env::var("TARGET").unwrap_or_else(|_| "x86_64-mica_os".to_string());

    let target_filename = format!("targets/{target}.json");
    let target_path = Path::new(&target_filename);

    if !target_path.exists() {
        // Built-in target (e.g., x86_64-unknown-linux-gnu), no validation needed
        return;
    }

    let content = fs::read_to_string(target_path)
        .unwrap_or_else(|e| panic!("Failed to read target specification: {e}"));

    let spec: TargetSpec = serde_json::from_str(&content)
        .unwrap_or_else(|e| panic!("Target specification is not valid JSON: {e}"));

    println!("cargo:rustc-env=TARGET_ARCH={}", spec.arch);

    assert!(
        !spec.llvm_target.trim().is_empty(),
        "Target specification is missing a valid 'llvm-target' value"
    );

    assert!(
        !spec.data_layout.trim().is_empty(),
        "Target specification is missing a valid 'data-layout' value"
    );

    assert!(
        spec.target_pointer_width == 64 && spec.arch == "x86_64",
        "Kernel target must be 64-bit x86_64, got '{}' with pointer width {}",
        spec.arch,
        spec.target_pointer_width
    );

    // Kernel code on x86_64 requires the red-zone to be disabled: interrupt
    // handlers would otherwise clobber the 128 bytes below RSP.
    assert!(
        spec.disable_redzone,
        "Target specification must set 'disable-redzone' to true for x86_64 kernel code"
    );

    // Kernel panic strategy must be abort (no unwinding support in no_std)
    assert_eq!(
        spec.panic_strategy.as_str(),
        "abort",
        "Target specification must set 'panic-strategy' to 'abort' for kernel code"
    );
}

/// Bake build information into the kernel image
fn print_build_info() {
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=BUILD_PROFILE={profile}");

    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=BUILD_TARGET={target}");

    // Build timestamp (seconds since UNIX_EPOCH)
    let timestamp_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs();
    println!("cargo:rustc-env=BUILD_TIMESTAMP={timestamp_secs}");

    // Git commit (if available)
    if let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
    {
        if output.status.success() {
            if let Ok(commit) = String::from_utf8(output.stdout) {
                let commit = commit.trim();
                println!("cargo:rustc-env=BUILD_COMMIT={commit}");
            }
        }
    }
}
