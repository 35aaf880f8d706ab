use serde::{Deserialize, Serialize};

/// Git SHA the binary was built from, or "unknown".
pub const BUILD_SHA: &str = env!("SESSION_BROKER_GIT_SHA");

const BUILD_TIMESTAMP: &str = env!("SESSION_BROKER_BUILD_TIMESTAMP");

/// Build identity reported by a running daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub git_sha: String,
    /// Commit time in seconds since the epoch, 0 when unknown.
    pub build_timestamp: u64,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            git_sha: BUILD_SHA.to_string(),
            build_timestamp: BUILD_TIMESTAMP.parse().unwrap_or(0),
        }
    }

    /// Whether a daemon reporting `self` was built from the same commit as this binary.
    pub fn matches_current(&self) -> bool {
        BUILD_SHA != "unknown" && self.git_sha == BUILD_SHA
    }
}
