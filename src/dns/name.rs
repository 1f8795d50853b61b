//! Domain name helpers.
//!
//! Names handled by the zone table and the dispatcher are always absolute,
//! lowercase and end with a dot (`example.com.`). The root is `.`.

/// Maximum length of a single label in octets
pub const MAX_LABEL_LENGTH: usize = 63;

/// Maximum length of a name in wire format
pub const MAX_NAME_LENGTH: usize = 255;

/// Normalise a textual name to lowercase FQDN form
pub fn fqdn(name: &str) -> String {
    let trimmed = name.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return ".".to_string();
    }
    format!("{}.", trimmed.to_lowercase())
}

/// Build an FQDN from wire labels
pub fn from_labels(labels: &[String]) -> String {
    let joined = labels
        .iter()
        .filter(|l| !l.is_empty())
        .map(|l| l.as_str())
        .collect::<Vec<_>>()
        .join(".");
    fqdn(&joined)
}

/// Split an FQDN into wire labels (root has none)
pub fn to_labels(name: &str) -> Vec<String> {
    name.trim_end_matches('.')
        .split('.')
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

/// Number of labels, not counting the root
pub fn label_count(name: &str) -> usize {
    name.trim_end_matches('.')
        .split('.')
        .filter(|l| !l.is_empty())
        .count()
}

/// Check that a name is a syntactically valid FQDN
pub fn is_valid_fqdn(name: &str) -> bool {
    if name == "." {
        return true;
    }
    if !name.ends_with('.') || name.starts_with('.') {
        return false;
    }

    let body = &name[..name.len() - 1];
    // wire length: one length octet per label plus the terminating zero
    if body.len() + 2 > MAX_NAME_LENGTH {
        return false;
    }

    body.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LENGTH
            && !label.chars().any(|c| c.is_whitespace() || c.is_control())
    })
}

/// True when `child` equals `parent` or sits below it
pub fn is_subdomain(parent: &str, child: &str) -> bool {
    if parent == "." {
        return true;
    }
    child == parent || child.ends_with(&format!(".{}", parent))
}

/// Strip the leftmost label, walking towards the root
pub fn parent(name: &str) -> Option<String> {
    if name == "." {
        return None;
    }
    match name.split_once('.') {
        Some((_, rest)) if !rest.is_empty() => Some(rest.to_string()),
        _ => Some(".".to_string()),
    }
}

/// Longest-suffix match of `qname` against `zones`.
///
/// The zone sharing the most trailing labels with `qname` wins. Callers
/// guarantee `zones` holds no duplicates, so a tie cannot occur.
pub fn longest_match<'a, I>(zones: I, qname: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut best: Option<(&'a str, usize)> = None;

    for zone in zones {
        if !is_subdomain(zone, qname) {
            continue;
        }
        let labels = label_count(zone);
        if best.is_none_or(|(_, best_labels)| labels > best_labels) {
            best = Some((zone.as_str(), labels));
        }
    }

    best.map(|(zone, _)| zone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fqdn() {
        assert_eq!(fqdn("Example.COM"), "example.com.");
        assert_eq!(fqdn("example.com."), "example.com.");
        assert_eq!(fqdn(""), ".");
        assert_eq!(fqdn("."), ".");
    }

    #[test]
    fn test_labels() {
        let labels = to_labels("www.example.com.");
        assert_eq!(labels, vec!["www", "example", "com"]);
        assert_eq!(from_labels(&labels), "www.example.com.");
        assert!(to_labels(".").is_empty());
        assert_eq!(from_labels(&[]), ".");
    }

    #[test]
    fn test_valid_fqdn() {
        assert!(is_valid_fqdn("example.com."));
        assert!(is_valid_fqdn("."));
        assert!(!is_valid_fqdn("example.com"));
        assert!(!is_valid_fqdn("example..com."));
        assert!(!is_valid_fqdn(&format!("{}.com.", "a".repeat(64))));
        assert!(!is_valid_fqdn("bad name.com."));
    }

    #[test]
    fn test_is_subdomain() {
        assert!(is_subdomain("example.com.", "www.example.com."));
        assert!(is_subdomain("example.com.", "example.com."));
        assert!(is_subdomain(".", "anything.org."));
        assert!(!is_subdomain("example.com.", "badexample.com."));
        assert!(!is_subdomain("www.example.com.", "example.com."));
    }

    #[test]
    fn test_parent() {
        assert_eq!(parent("www.example.com.").as_deref(), Some("example.com."));
        assert_eq!(parent("com.").as_deref(), Some("."));
        assert_eq!(parent("."), None);
    }

    #[test]
    fn test_longest_match_prefers_more_labels() {
        let zones = vec![
            "example.".to_string(),
            "a.example.".to_string(),
            ".".to_string(),
        ];
        assert_eq!(longest_match(&zones, "x.a.example."), Some("a.example."));
        assert_eq!(longest_match(&zones, "b.example."), Some("example."));
        assert_eq!(longest_match(&zones, "other.org."), Some("."));
    }

    #[test]
    fn test_longest_match_none() {
        let zones = vec!["example.".to_string()];
        assert_eq!(longest_match(&zones, "example.org."), None);
    }
}
