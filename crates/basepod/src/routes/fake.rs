//! Fake — in-memory [`RouteOps`] double for tests.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{static_route_id, Route, RouteError, RouteOps};

/// Stores routes in an ordered list, newest first, exactly like the
/// prepend-to-front behavior of the live implementation.
#[derive(Default)]
pub struct FakeRoutes {
    routes: Mutex<Vec<Route>>,
    static_roots: Mutex<Vec<(String, String)>>,
}

impl FakeRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.routes.lock().iter().any(|r| r.id == id)
    }

    pub fn get(&self, id: &str) -> Option<Route> {
        self.routes.lock().iter().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.lock().is_empty()
    }
}

#[async_trait]
impl RouteOps for FakeRoutes {
    async fn ping(&self) -> Result<(), RouteError> {
        Ok(())
    }

    async fn add_route(&self, route: Route) -> Result<(), RouteError> {
        let mut routes = self.routes.lock();
        routes.retain(|r| r.id != route.id);
        routes.insert(0, route);
        Ok(())
    }

    async fn remove_route(&self, id: &str) -> Result<(), RouteError> {
        self.routes.lock().retain(|r| r.id != id);
        Ok(())
    }

    async fn update_route(&self, route: Route) -> Result<(), RouteError> {
        self.add_route(route).await
    }

    async fn list_routes(&self) -> Result<Vec<Route>, RouteError> {
        Ok(self.routes.lock().clone())
    }

    async fn add_static_route(&self, domain: &str, root_dir: &str) -> Result<(), RouteError> {
        let id = static_route_id(domain);
        self.static_roots
            .lock()
            .push((domain.to_string(), root_dir.to_string()));
        self.add_route(Route {
            id,
            domain: domain.to_string(),
            upstream: String::new(),
            enable_ssl: true,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_route_is_idempotent_by_id() {
        let fake = FakeRoutes::new();
        let route = Route {
            id: "basepod-blog".to_string(),
            domain: "blog.dev".to_string(),
            upstream: "localhost:10001".to_string(),
            enable_ssl: true,
        };

        fake.add_route(route.clone()).await.unwrap();
        let updated = Route {
            upstream: "localhost:10002".to_string(),
            ..route.clone()
        };
        fake.add_route(updated).await.unwrap();

        assert_eq!(fake.len(), 1);
        assert_eq!(fake.get("basepod-blog").unwrap().upstream, "localhost:10002");
    }

    #[tokio::test]
    async fn test_newest_route_is_first() {
        let fake = FakeRoutes::new();
        for i in 0..3 {
            fake.add_route(Route {
                id: format!("r{}", i),
                domain: format!("d{}.dev", i),
                upstream: "localhost:1".to_string(),
                enable_ssl: false,
            })
            .await
            .unwrap();
        }
        let routes = fake.list_routes().await.unwrap();
        assert_eq!(routes[0].id, "r2");
        assert_eq!(routes[2].id, "r0");
    }

    #[tokio::test]
    async fn test_remove_unknown_id_is_ok() {
        let fake = FakeRoutes::new();
        assert!(fake.remove_route("missing").await.is_ok());
    }
}
