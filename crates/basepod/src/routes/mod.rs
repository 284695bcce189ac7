//! Route manager — uniform API over the reverse proxy.
//!
//! `caddy.rs` drives the Caddy admin API; `fake.rs` is the in-memory test
//! double; `authorize.rs` holds the on-demand TLS policy.

pub mod authorize;
pub mod caddy;
pub mod fake;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use authorize::authorize_domain;
pub use caddy::CaddyRoutes;
pub use fake::FakeRoutes;

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Route manager unreachable: {0}")]
    Unreachable(String),
    #[error("Route manager rejected the request: {0}")]
    Rejected(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// One domain→upstream mapping owned by the route manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Stable route id; `AddRoute` is idempotent by this key.
    pub id: String,
    pub domain: String,
    /// `host:port` of the upstream.
    pub upstream: String,
    pub enable_ssl: bool,
}

/// Primary route id for an app.
pub fn primary_route_id(app_name: &str) -> String {
    format!("basepod-{}", app_name)
}

/// Alias route id: app id prefix plus the alias domain.
pub fn alias_route_id(id_prefix: &str, alias: &str) -> String {
    format!("alias-{}-{}", id_prefix, alias)
}

/// Static route id for a domain.
pub fn static_route_id(domain: &str) -> String {
    format!("static-{}", domain)
}

#[async_trait]
pub trait RouteOps: Send + Sync {
    async fn ping(&self) -> Result<(), RouteError>;

    /// Install a route. Idempotent by id: any existing route with the same
    /// id is removed first, and the new route is prepended so specific host
    /// matches win over wildcard/default routes.
    async fn add_route(&self, route: Route) -> Result<(), RouteError>;

    /// Remove a route by id. Unknown ids are not an error.
    async fn remove_route(&self, id: &str) -> Result<(), RouteError>;

    async fn update_route(&self, route: Route) -> Result<(), RouteError>;

    async fn list_routes(&self) -> Result<Vec<Route>, RouteError>;

    /// Install a static-file route: document root, SPA try-files, gzip.
    async fn add_static_route(&self, domain: &str, root_dir: &str) -> Result<(), RouteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_id_schemas() {
        assert_eq!(primary_route_id("blog"), "basepod-blog");
        assert_eq!(alias_route_id("b42c9a3e", "www.blog.dev"), "alias-b42c9a3e-www.blog.dev");
        assert_eq!(static_route_id("docs.example.com"), "static-docs.example.com");
    }
}
