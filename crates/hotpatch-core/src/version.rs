/// Decide whether the patch identified by `latest` should replace `current`.
///
/// Patch versions are opaque tokens (usually a content hash), so only
/// equality is meaningful. An absent or empty `current` means no patch is
/// loaded yet. An empty `latest` never triggers an upgrade.
#[must_use]
pub fn needs_upgrade(current: Option<&str>, latest: &str) -> bool {
    if latest.is_empty() {
        return false;
    }

    match current.filter(|current| !current.is_empty()) {
        Some(current) => current != latest,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_comparison() {
        assert!(needs_upgrade(Some("v1"), "v2"));
        assert!(needs_upgrade(None, "v2"));
        assert!(needs_upgrade(Some(""), "v2"));
        assert!(!needs_upgrade(Some("v1"), "v1"));
        assert!(!needs_upgrade(Some("v1"), ""));
        assert!(!needs_upgrade(None, ""));
    }

    #[test]
    fn comparison_is_exact_string_inequality() {
        assert!(needs_upgrade(Some("ABC123"), "abc123"));
        assert!(needs_upgrade(Some("1.0"), "1.0.0"));
        assert!(needs_upgrade(Some("abc "), "abc"));
        assert!(!needs_upgrade(
            Some("50639d63848d275a7efcd04478de62ca"),
            "50639d63848d275a7efcd04478de62ca"
        ));
    }
}
