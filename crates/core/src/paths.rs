//! Path-segment sanitising for tenant, component and context identifiers.
//!
//! Identifiers arrive from requests and end up as directory names under the
//! project root. They must never escape that root.

/// Strip traversal sequences and separators so `s` is safe as one path segment.
pub fn sanitize_segment(s: &str) -> String {
    s.replace("..", "").replace(['/', '\\'], "_")
}

/// Whether `s` can be used as a single path segment without rewriting.
pub fn is_plain_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains("..") && !s.contains(['/', '\\'])
}
