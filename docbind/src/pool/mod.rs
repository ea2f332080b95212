use crate::client::{ConnectionHandle, StoreClient};
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Keyed cache of connection handles, one per (host, port).
///
/// Handles are created lazily by the underlying [`StoreClient`] and live as
/// long as the pool; nothing is evicted.
pub struct ConnectionPool {
    client: Arc<dyn StoreClient>,
    connections: Mutex<HashMap<(String, u16), Arc<dyn ConnectionHandle>>>,
}

impl ConnectionPool {
    pub fn new(client: Arc<dyn StoreClient>) -> Self {
        ConnectionPool {
            client,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached handle for (host, port), creating it if needed.
    /// The check and insert happen under one lock.
    pub fn get_or_create(&self, host: &str, port: u16) -> Result<Arc<dyn ConnectionHandle>> {
        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let key = (host.to_string(), port);
        if let Some(existing) = connections.get(&key) {
            log::debug!("Reusing connection to {host}:{port}");
            return Ok(Arc::clone(existing));
        }

        log::debug!("Creating connection to {host}:{port}");
        let handle = self.client.connect(host, port)?;
        connections.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    /// Number of distinct (host, port) targets seen so far.
    pub fn len(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connections", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteClient;

    #[test]
    fn test_same_target_shares_handle() {
        let pool = ConnectionPool::new(Arc::new(SqliteClient::in_memory()));
        let a = pool.get_or_create("localhost", 27017).unwrap();
        let b = pool.get_or_create("localhost", 27017).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_distinct_targets_get_distinct_handles() {
        let pool = ConnectionPool::new(Arc::new(SqliteClient::in_memory()));
        let a = pool.get_or_create("localhost", 27017).unwrap();
        let b = pool.get_or_create("localhost", 27018).unwrap();
        let c = pool.get_or_create("db.internal", 27017).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_handles_are_not_connected_eagerly() {
        let pool = ConnectionPool::new(Arc::new(SqliteClient::in_memory()));
        assert!(pool.is_empty());
        let handle = pool.get_or_create("localhost", 27017).unwrap();
        assert!(!handle.is_connected());
    }

    #[test]
    fn test_concurrent_get_or_create() {
        let pool = Arc::new(ConnectionPool::new(Arc::new(SqliteClient::in_memory())));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || pool.get_or_create("localhost", 27017).unwrap())
            })
            .collect();
        let handles: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(pool.len(), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    }
}
