use std::path::{Path, PathBuf};
use std::process::Command;

/// Non-empty lines allowed per source file.
const MAX_LINES: usize = 750;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/packed-refs");

    let sha = git(&["rev-parse", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let timestamp = git(&["show", "-s", "--format=%ct", "HEAD"])
        .and_then(|ts| ts.parse::<u64>().ok())
        .unwrap_or(0);
    println!("cargo:rustc-env=SESSION_BROKER_GIT_SHA={}", sha);
    println!("cargo:rustc-env=SESSION_BROKER_BUILD_TIMESTAMP={}", timestamp);

    check_sources(Path::new("src"));
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|out| out.trim().to_string())
}

/// Fails the build on oversized source files and on `allow(dead_code)`.
fn check_sources(src: &Path) {
    println!("cargo:rerun-if-changed={}", src.display());

    let mut files = Vec::new();
    collect_rust_files(src, &mut files);

    let mut problems = Vec::new();
    for file in &files {
        let Ok(content) = std::fs::read_to_string(file) else {
            continue;
        };
        let lines = content.lines().filter(|line| !line.trim().is_empty()).count();
        if lines > MAX_LINES {
            problems.push(format!("{}: {} lines, limit is {}", file.display(), lines, MAX_LINES));
        }
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.starts_with("#[allow(") && line.contains("dead_code") {
                problems.push(format!("{}:{}: remove dead code instead", file.display(), number + 1));
            }
        }
    }

    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("  {}", problem);
        }
        panic!("source checks failed with {} problem(s)", problems.len());
    }
}

fn collect_rust_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for path in entries.flatten().map(|entry| entry.path()) {
        if path.is_dir() {
            collect_rust_files(&path, files);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            files.push(path);
        }
    }
}
