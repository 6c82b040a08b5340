//! Filesystem root path of the hosting process.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// The directory the hosting executable runs from, computed once on first
/// access. Falls back to the current directory (and, failing that, `.`) when
/// the executable path cannot be resolved.
pub fn root_path() -> &'static Path {
    static ROOT: OnceLock<PathBuf> = OnceLock::new();
    ROOT.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

#[cfg(test)]
mod tests {
    use super::root_path;

    #[test]
    fn root_path_is_stable_across_calls() {
        assert_eq!(root_path(), root_path());
        assert!(!root_path().as_os_str().is_empty());
    }
}
