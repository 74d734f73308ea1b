//! Stamps the binary with a build identifier
//!
//! `RAREXSEC_BUILD` reads like `0.1.0+3f2a9c1d-dirty (release, 2026-10-18T09:12:00Z)`.
//! Catalogues are compared across rebuilds, so the timestamp honours
//! `SOURCE_DATE_EPOCH` when it is set.

use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    Some(text.trim().to_string())
}

fn revision() -> String {
    let Some(hash) = git(&["rev-parse", "--short=8", "HEAD"]) else {
        return "nogit".to_string();
    };
    let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
        .map(|changes| !changes.is_empty())
        .unwrap_or(false);
    if dirty {
        format!("{}-dirty", hash)
    } else {
        hash
    }
}

fn build_time() -> String {
    let pinned = std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|secs| secs.trim().parse::<i64>().ok())
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0));
    pinned
        .unwrap_or_else(chrono::Utc::now)
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn main() {
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    if let Some(head) = git(&["rev-parse", "--git-path", "HEAD"]) {
        println!("cargo:rerun-if-changed={}", head);
    }

    let version = std::env::var("CARGO_PKG_VERSION").unwrap_or_default();
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    println!(
        "cargo:rustc-env=RAREXSEC_BUILD={}+{} ({}, {})",
        version,
        revision(),
        profile,
        build_time()
    );
}
