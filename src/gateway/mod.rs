//! Gateway registry
//!
//! Concurrent map from run identifier to internal URL, consulted by the
//! external reverse proxy on every preview request. Writes happen only on
//! the lifecycle engine's transitions into and out of `ready`.

use dashmap::DashMap;

/// Run-id to internal-URL registry
#[derive(Default)]
pub struct GatewayRegistry {
    entries: DashMap<String, String>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose a run at the given internal URL
    pub fn register(&self, run_id: &str, url: String) {
        self.entries.insert(run_id.to_string(), url);
    }

    /// Remove a run from the registry; idempotent
    pub fn unregister(&self, run_id: &str) {
        self.entries.remove(run_id);
    }

    /// Resolve a run identifier to its internal URL
    pub fn resolve(&self, run_id: &str) -> Option<String> {
        self.entries.get(run_id).map(|url| url.clone())
    }

    /// Number of registered runs
    pub fn size(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_resolve_unregister() {
        let registry = GatewayRegistry::new();

        registry.register("run-1", "http://127.0.0.1:3001".into());
        assert_eq!(
            registry.resolve("run-1").as_deref(),
            Some("http://127.0.0.1:3001")
        );
        assert_eq!(registry.size(), 1);

        registry.unregister("run-1");
        assert_eq!(registry.resolve("run-1"), None);
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = GatewayRegistry::new();

        registry.register("run-1", "http://127.0.0.1:3001".into());
        registry.unregister("run-1");
        registry.unregister("run-1");

        assert_eq!(registry.resolve("run-1"), None);
    }

    #[test]
    fn test_register_overwrites() {
        let registry = GatewayRegistry::new();

        registry.register("run-1", "http://127.0.0.1:3001".into());
        registry.register("run-1", "http://127.0.0.1:3002".into());

        assert_eq!(
            registry.resolve("run-1").as_deref(),
            Some("http://127.0.0.1:3002")
        );
        assert_eq!(registry.size(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_readers() {
        use std::sync::Arc;

        let registry = Arc::new(GatewayRegistry::new());
        registry.register("run-1", "http://127.0.0.1:3001".into());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    assert!(registry.resolve("run-1").is_some());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
