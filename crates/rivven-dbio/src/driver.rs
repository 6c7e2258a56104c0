//! Process-wide driver registry
//!
//! Maps driver class names (as used in `ConnectionConfig::new`) to connection
//! factories. Built-in backends register themselves on first lookup; other
//! drivers are added with [`register`].

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::connection::ConnectionFactory;
use crate::error::{Error, Result};

type Registry = RwLock<HashMap<String, Arc<dyn ConnectionFactory>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        #[allow(unused_mut)]
        let mut drivers: HashMap<String, Arc<dyn ConnectionFactory>> = HashMap::new();

        #[cfg(feature = "postgres")]
        {
            let factory: Arc<dyn ConnectionFactory> = Arc::new(crate::postgres::PgConnectionFactory);
            for name in crate::postgres::DRIVER_NAMES {
                drivers.insert(name.to_string(), Arc::clone(&factory));
            }
        }

        RwLock::new(drivers)
    })
}

/// Register `factory` under `name`, replacing any previous registration
pub fn register(name: impl Into<String>, factory: Arc<dyn ConnectionFactory>) {
    let name = name.into();
    debug!(driver = %name, factory = factory.name(), "Registering driver");
    registry().write().insert(name, factory);
}

/// Remove a registration, returns whether one existed
pub fn deregister(name: &str) -> bool {
    registry().write().remove(name).is_some()
}

/// Resolve a driver by name
pub fn lookup(name: &str) -> Result<Arc<dyn ConnectionFactory>> {
    registry()
        .read()
        .get(name)
        .cloned()
        .ok_or_else(|| Error::config(format!("no driver registered under '{}'", name)))
}

/// Names of all registered drivers, sorted
pub fn registered() -> Vec<String> {
    let mut names: Vec<String> = registry().read().keys().cloned().collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryDatabase;

    #[test]
    fn test_register_and_lookup() {
        let db = MemoryDatabase::new();
        register("test.driver.Registry", db.factory());

        assert!(registered().contains(&"test.driver.Registry".to_string()));
        assert_eq!(lookup("test.driver.Registry").unwrap().name(), "memory");

        assert!(deregister("test.driver.Registry"));
        assert!(!deregister("test.driver.Registry"));
        assert!(matches!(
            lookup("test.driver.Registry").err(),
            Some(Error::Configuration { .. })
        ));
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn test_postgres_is_builtin() {
        assert!(lookup("org.postgresql.Driver").is_ok());
        assert!(lookup("postgres").is_ok());
    }
}
