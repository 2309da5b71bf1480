//! Spawns the built binary and checks the argument surface and the error
//! paths that need no kernel interface.

use std::process::{Command, Output};

fn yamlink(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_yamlink"))
        .args(args)
        .output()
        .expect("binary should spawn")
}

#[test]
fn version_prints_and_exits_zero() {
    let out = yamlink(&["version"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.starts_with("yamlink "));
}

#[test]
fn extended_version_reports_the_toolchain_floor() {
    let out = yamlink(&["version", "--extended"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("rustc min:"));
}

#[test]
fn show_requires_family_and_command() {
    let out = yamlink(&["show"]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("--family"));

    let out = yamlink(&["show", "--family", "lnet"]);
    assert!(!out.status.success());
}

#[test]
fn unknown_subcommand_is_rejected() {
    let out = yamlink(&["frobnicate"]);
    assert!(!out.status.success());
}

#[test]
fn apply_reports_an_unreadable_document() {
    let out = yamlink(&[
        "apply",
        "/no/such/document.yaml",
        "--family",
        "lnet",
        "--command",
        "1",
    ]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("error:"));
    #[cfg(target_os = "linux")]
    assert!(stderr.contains("failed reading /no/such/document.yaml"));
}

#[test]
fn log_flags_are_accepted_globally() {
    let out = yamlink(&["--log-level", "debug", "--log-format", "json", "version"]);
    assert!(out.status.success());
}
