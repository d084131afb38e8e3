use std::process::Command;

fn main() {
    let hash = Command::new("git").args(["rev-parse", "HEAD"]).output().ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .unwrap_or_else(|| String::from("unknown"));

    println!("cargo:rustc-env=GIT_COMMIT_HASH={}", hash.trim_end());
}
