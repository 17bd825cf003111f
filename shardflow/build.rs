use std::env;
use std::process::Command;

/// Short commit of the checkout, if it can be determined.
fn git_commit() -> Option<String> {
    // set when building inside a container
    if let Ok(commit) = env::var("GIT_COMMIT") {
        return Some(commit);
    }
    let output = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let commit = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!commit.is_empty()).then_some(commit)
}

fn main() {
    let version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "latest".to_string());
    let commit = git_commit().unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rerun-if-env-changed=GIT_COMMIT");
    println!("cargo:rustc-env=SHARDFLOW_VERSION_INFO={version}+{commit}");
}
