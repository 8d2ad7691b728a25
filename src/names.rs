//! Domain name normalization helpers.
//!
//! Every name that enters the trie, the store key space, or the query engine
//! goes through [`fqdn`] first so that `Example.COM`, `example.com` and
//! `example.com.` all address the same node.

/// The wildcard label reserved by the firewall trie.
pub const WILDCARD_LABEL: &str = "*";

/// Returns the lowercase, trailing-dot-terminated form of `name`.
///
/// The empty string and `"."` both normalize to the root name `"."`.
pub fn fqdn(name: &str) -> String {
    let trimmed = name.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return ".".to_string();
    }
    let mut out = trimmed.to_ascii_lowercase();
    out.push('.');
    out
}

/// Splits a name into its labels, most significant (TLD) label first.
///
/// The root name has no labels.
pub fn labels_rev(name: &str) -> Vec<String> {
    let normalized = fqdn(name);
    let body = normalized.trim_end_matches('.');
    if body.is_empty() {
        return Vec::new();
    }
    body.rsplit('.').map(str::to_string).collect()
}

/// Rebuilds a fully-qualified name from labels ordered TLD first.
pub fn from_labels_rev<S: AsRef<str>>(labels: &[S]) -> String {
    if labels.is_empty() {
        return ".".to_string();
    }
    let mut out = String::new();
    for label in labels.iter().rev() {
        out.push_str(label.as_ref());
        out.push('.');
    }
    out
}

/// Returns `true` if `name` equals `ancestor` or lies beneath it.
pub fn is_subdomain_of(name: &str, ancestor: &str) -> bool {
    let name = labels_rev(name);
    let ancestor = labels_rev(ancestor);
    name.len() >= ancestor.len() && name.iter().zip(ancestor.iter()).all(|(a, b)| a == b)
}
