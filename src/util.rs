//! Utility functions

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

/// Maximum length for sanitized directory names
const MAX_NAME_LEN: usize = 80;

/// Maximum stored length for per-item error messages
pub const MAX_ERROR_LEN: usize = 150;

fn forbidden_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // unwrap: the pattern is a compile-time constant
    #[allow(clippy::unwrap_used)]
    RE.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\n\r\t]"#).unwrap())
}

fn whitespace_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Sanitize a query string into a filesystem-safe directory name.
///
/// Strips characters that are invalid on common filesystems, collapses
/// whitespace runs to underscores, and caps the length. An empty result
/// falls back to "search_results".
pub fn sanitize_name(s: &str) -> String {
    let stripped = forbidden_chars().replace_all(s, "");
    let collapsed = whitespace_runs().replace_all(stripped.trim(), "_");
    let name: String = collapsed.chars().take(MAX_NAME_LEN).collect();

    if name.is_empty() {
        "search_results".to_string()
    } else {
        name
    }
}

/// Truncate an error message for storage, preserving char boundaries.
pub fn truncate_error(msg: &str) -> String {
    if msg.chars().count() <= MAX_ERROR_LEN {
        msg.to_string()
    } else {
        msg.chars().take(MAX_ERROR_LEN).collect()
    }
}

/// Total size of regular files directly inside `dir`, in MiB.
///
/// Returns 0.0 when the directory is missing or unreadable — output size is
/// informational only and must never fail a download.
pub fn dir_size_mb(dir: &Path) -> f64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0.0;
    };

    let bytes: u64 = entries
        .flatten()
        .filter_map(|entry| entry.metadata().ok())
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
        .sum();

    bytes as f64 / (1024.0 * 1024.0)
}
