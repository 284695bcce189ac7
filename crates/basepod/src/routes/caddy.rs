//! Caddy routes — live [`RouteOps`] over the Caddy admin API.
//!
//! Routes are managed on one named HTTP server. Insertion uses the numeric
//! index form (`PUT .../routes/0`) so new routes land ahead of any wildcard
//! route; deletion uses the `@id` addressing (`DELETE /id/<route id>`).

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Route, RouteError, RouteOps};

pub struct CaddyRoutes {
    admin_url: String,
    server_name: String,
    http: reqwest::Client,
}

impl CaddyRoutes {
    pub fn new(admin_url: &str, server_name: &str) -> Self {
        Self {
            admin_url: admin_url.trim_end_matches('/').to_string(),
            server_name: server_name.to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn routes_url(&self) -> String {
        format!(
            "{}/config/apps/http/servers/{}/routes",
            self.admin_url, self.server_name
        )
    }

    /// Delete by `@id`, tolerating unknown ids.
    async fn delete_by_id(&self, id: &str) -> Result<(), RouteError> {
        let url = format!("{}/id/{}", self.admin_url, id);
        let response = self.http.delete(&url).send().await?;
        // Unknown id means the route is already gone.
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(RouteError::Rejected(format!(
            "DELETE {} -> {}",
            url,
            response.status()
        )))
    }

    async fn insert_front(&self, route_json: Value) -> Result<(), RouteError> {
        let url = format!("{}/0", self.routes_url());
        let response = self.http.put(&url).json(&route_json).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RouteError::Rejected(format!(
                "PUT {} -> {}: {}",
                url, status, body
            )));
        }
        Ok(())
    }
}

/// The reverse-proxy route body: forwards to the upstream with the original
/// `Host` preserved and forwarding headers set.
fn proxy_route_json(route: &Route) -> Value {
    json!({
        "@id": route.id,
        "match": [{ "host": [route.domain] }],
        "handle": [{
            "handler": "subroute",
            "routes": [{
                "handle": [{
                    "handler": "reverse_proxy",
                    "upstreams": [{ "dial": route.upstream }],
                    "headers": {
                        "request": {
                            "set": {
                                "Host": ["{http.request.host}"],
                                "X-Forwarded-Host": ["{http.request.host}"],
                                "X-Forwarded-Proto": ["{http.request.scheme}"],
                                "X-Real-Ip": ["{http.request.remote.host}"]
                            }
                        }
                    }
                }]
            }]
        }],
        "terminal": true
    })
}

/// Static-file route body: document root, SPA try-files, gzip, file server.
fn static_route_json(id: &str, domain: &str, root_dir: &str) -> Value {
    json!({
        "@id": id,
        "match": [{ "host": [domain] }],
        "handle": [{
            "handler": "subroute",
            "routes": [
                { "handle": [{ "handler": "vars", "root": root_dir }] },
                {
                    "handle": [{
                        "handler": "rewrite",
                        "uri": "{http.matchers.file.relative}"
                    }],
                    "match": [{
                        "file": {
                            "try_files": ["{http.request.uri.path}", "{http.request.uri.path}/index.html", "/index.html"]
                        }
                    }]
                },
                { "handle": [{ "handler": "encode", "encodings": { "gzip": {} }, "prefer": ["gzip"] }] },
                { "handle": [{ "handler": "file_server" }] }
            ]
        }],
        "terminal": true
    })
}

#[async_trait]
impl RouteOps for CaddyRoutes {
    async fn ping(&self) -> Result<(), RouteError> {
        let url = format!("{}/config/", self.admin_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RouteError::Unreachable(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(RouteError::Unreachable(format!(
                "admin API returned {}",
                response.status()
            )))
        }
    }

    async fn add_route(&self, route: Route) -> Result<(), RouteError> {
        self.delete_by_id(&route.id).await?;
        self.insert_front(proxy_route_json(&route)).await
    }

    async fn remove_route(&self, id: &str) -> Result<(), RouteError> {
        self.delete_by_id(id).await
    }

    async fn update_route(&self, route: Route) -> Result<(), RouteError> {
        self.add_route(route).await
    }

    async fn list_routes(&self) -> Result<Vec<Route>, RouteError> {
        let response = self.http.get(self.routes_url()).send().await?;
        if !response.status().is_success() {
            return Err(RouteError::Rejected(format!(
                "GET routes -> {}",
                response.status()
            )));
        }
        let raw: Vec<Value> = response.json().await?;
        Ok(raw.iter().filter_map(route_from_json).collect())
    }

    async fn add_static_route(&self, domain: &str, root_dir: &str) -> Result<(), RouteError> {
        let id = super::static_route_id(domain);
        self.delete_by_id(&id).await?;
        self.insert_front(static_route_json(&id, domain, root_dir))
            .await
    }
}

/// Best-effort reconstruction of a [`Route`] from Caddy config JSON.
/// Routes without an `@id` (user-managed) are skipped.
fn route_from_json(value: &Value) -> Option<Route> {
    let id = value.get("@id")?.as_str()?.to_string();
    let domain = value
        .pointer("/match/0/host/0")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let upstream = value
        .pointer("/handle/0/routes/0/handle/0/upstreams/0/dial")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(Route {
        id,
        domain,
        upstream,
        enable_ssl: false,
    })
}
