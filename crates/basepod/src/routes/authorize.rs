//! On-demand TLS policy — answers the proxy's "may I issue a certificate
//! for this hostname?" probe.
//!
//! Pure function of the queried domain, the configured root, and the
//! dashboard host, so it is testable without HTTP.

/// Decide whether the proxy may obtain a certificate for `domain`.
///
/// Allowed: the dashboard host and any subdomain of the configured root.
/// Everything else — an empty query, the bare apex, a foreign domain — is
/// rejected.
pub fn authorize_domain(domain: &str, root_domain: &str, dashboard_host: &str) -> bool {
    if domain.is_empty() {
        return false;
    }
    if domain.eq_ignore_ascii_case(dashboard_host) {
        return true;
    }
    let suffix = format!(".{}", root_domain);
    domain
        .to_ascii_lowercase()
        .ends_with(&suffix.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dashboard_host_allowed() {
        assert!(authorize_domain("d.example.com", "example.com", "d.example.com"));
    }

    #[test]
    fn test_root_subdomain_allowed() {
        assert!(authorize_domain("blog.example.com", "example.com", "d.example.com"));
        assert!(authorize_domain("a.b.example.com", "example.com", "d.example.com"));
        assert!(authorize_domain("BLOG.Example.COM", "example.com", "d.example.com"));
    }

    #[test]
    fn test_foreign_domain_rejected() {
        assert!(!authorize_domain("evil.com", "example.com", "d.example.com"));
        // An app record claiming an outside domain does not make it ours
        assert!(!authorize_domain("blog.custom.io", "example.com", "d.example.com"));
        // Suffix trickery: not a true subdomain of the root
        assert!(!authorize_domain("notexample.com", "example.com", "d.example.com"));
    }

    #[test]
    fn test_empty_query_rejected() {
        assert!(!authorize_domain("", "example.com", "d.example.com"));
    }

    #[test]
    fn test_bare_root_rejected() {
        // The apex itself is not a subdomain and is not served by basepod
        assert!(!authorize_domain("example.com", "example.com", "d.example.com"));
    }
}
