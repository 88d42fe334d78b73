//! Text helpers shared by display rendering and log previews.

/// Shortens `s` to at most `max_chars` characters, appending `...` when cut.
///
/// Counts characters rather than bytes, so multi-byte text is never split.
///
/// ```
/// use screenloop_core::truncate_with_ellipsis;
///
/// assert_eq!(truncate_with_ellipsis("ls -la", 10), "ls -la");
/// assert_eq!(truncate_with_ellipsis("cargo test --all", 5), "cargo...");
/// ```
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}
