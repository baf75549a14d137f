//! Registered test servers, keyed by server name

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::error::InteropError;
use super::types::Service;

#[derive(Default)]
pub struct ServiceRegistry {
    servers: RwLock<BTreeMap<String, Vec<Service>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server. A name can only be registered once.
    pub fn register(&self, server_name: &str, services: Vec<Service>) -> Result<(), InteropError> {
        let server_name = server_name.trim();
        if server_name.is_empty() {
            return Err(InteropError::InvalidServerName);
        }
        if services.is_empty() {
            return Err(InteropError::NoServices(server_name.to_string()));
        }

        let mut servers = self.servers.write();
        if servers.contains_key(server_name) {
            return Err(InteropError::AlreadyRegistered(server_name.to_string()));
        }
        tracing::debug!(
            server = server_name,
            services = services.len(),
            "Registered test server"
        );
        servers.insert(server_name.to_string(), services);
        Ok(())
    }

    /// Snapshot of all registrations, ordered by server name
    pub fn list(&self) -> BTreeMap<String, Vec<Service>> {
        self.servers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.servers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::interop::types::{Propagation, Transport};

    fn service(name: &str, port: u16) -> Service {
        Service {
            name: name.to_string(),
            host: "localhost".to_string(),
            port,
            transport: Transport::Http,
            propagation: Propagation::TraceContext,
        }
    }

    #[test]
    fn test_register_and_list() {
        let registry = ServiceRegistry::new();
        registry
            .register("java", vec![service("java-http", 1), service("java-grpc", 2)])
            .unwrap();
        registry.register("go", vec![service("go-http", 3)]).unwrap();

        let servers = registry.list();
        assert_eq!(
            servers.keys().cloned().collect::<Vec<_>>(),
            vec!["go".to_string(), "java".to_string()]
        );
        assert_eq!(servers["java"].len(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_duplicate_fails() {
        let registry = ServiceRegistry::new();
        registry.register("java", vec![service("a", 1)]).unwrap();

        let err = registry.register("java", vec![service("b", 2)]).unwrap_err();
        assert!(matches!(err, InteropError::AlreadyRegistered(ref n) if n == "java"));
        assert_eq!(err.to_string(), "java already registered");
        // Original registration is kept
        assert_eq!(registry.list()["java"][0].name, "a");
    }

    #[test]
    fn test_register_rejects_invalid() {
        let registry = ServiceRegistry::new();
        assert!(matches!(
            registry.register("  ", vec![service("a", 1)]),
            Err(InteropError::InvalidServerName)
        ));
        assert!(matches!(
            registry.register("python", vec![]),
            Err(InteropError::NoServices(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_is_snapshot() {
        let registry = ServiceRegistry::new();
        registry.register("a", vec![service("a", 1)]).unwrap();
        let snapshot = registry.list();
        registry.register("b", vec![service("b", 2)]).unwrap();
        assert_eq!(snapshot.len(), 1);
    }
}
