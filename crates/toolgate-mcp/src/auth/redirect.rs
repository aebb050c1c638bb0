//! Redirect URI matching.
//!
//! Matching is exact byte equality against the registered list. No
//! wildcard, prefix, or scheme normalization: `https://a/cb` and
//! `https://a/cb/` are different URIs.

/// Check whether `candidate` is one of the registered redirect URIs.
#[must_use]
pub fn is_registered(registered: &[String], candidate: &str) -> bool {
    registered.iter().any(|uri| uri == candidate)
}

/// Validate a redirect URI offered at client registration.
///
/// Requires a scheme and rejects whitespace and fragments (RFC 6749
/// §3.1.2 forbids fragment components). Custom schemes used by native
/// clients are accepted.
#[must_use]
pub fn is_valid_registration(uri: &str) -> bool {
    !uri.is_empty()
        && uri.contains(':')
        && !uri.contains(char::is_whitespace)
        && !uri.contains('#')
}
