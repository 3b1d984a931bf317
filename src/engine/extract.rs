/// Extracts the bare domain a rule points at.
///
/// Leading `|` anchors are stripped, everything from the first `^` on is
/// dropped and `*` wildcards are removed. Returns `None` when nothing is
/// left, which makes the rule permanently non-validatable.
pub fn extract_domain(rule: &str) -> Option<String> {
    let body = rule.trim().trim_start_matches('|');
    let head = match body.find('^') {
        Some(idx) => &body[..idx],
        None => body,
    };
    let domain: String = head.chars().filter(|c| *c != '*').collect();
    let domain = domain.trim();
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_adblock_forms() {
        assert_eq!(extract_domain("|ads.example^"), Some("ads.example".into()));
        assert_eq!(
            extract_domain("||tracker.example.com^"),
            Some("tracker.example.com".into())
        );
        assert_eq!(
            extract_domain("||*.cdn.example^$third-party"),
            Some(".cdn.example".into())
        );
        assert_eq!(extract_domain("plain.example"), Some("plain.example".into()));
    }

    #[test]
    fn test_extract_empty_results() {
        assert_eq!(extract_domain(""), None);
        assert_eq!(extract_domain("||^"), None);
        assert_eq!(extract_domain("|*^"), None);
        assert_eq!(extract_domain("^example.com"), None);
    }
}
