//! Executable resolution helpers.
//!
//! Centralizes "where is this binary on PATH" so callers never build a
//! path by string interpolation.

use std::path::PathBuf;

/// Resolve an executable name (e.g. `"git"`) to an absolute path using the
/// platform `PATH`. Blocking; callers on an async runtime should wrap this
/// in `spawn_blocking` if called on a hot path.
pub fn resolve_executable_path_blocking(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Async wrapper around [`resolve_executable_path_blocking`] for callers
/// that never want to block the runtime thread.
pub async fn resolve_executable_path(name: &str) -> Option<PathBuf> {
    let name = name.to_string();
    tokio::task::spawn_blocking(move || resolve_executable_path_blocking(&name))
        .await
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_missing_executable() {
        assert!(resolve_executable_path_blocking("definitely-not-a-real-binary-xyz").is_none());
    }

    #[tokio::test]
    async fn test_resolve_git_if_present() {
        // This only asserts the function doesn't panic; `git` may or may not
        // be installed in the environment running the tests.
        let _ = resolve_executable_path("git").await;
    }
}
