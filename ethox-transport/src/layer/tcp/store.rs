use std::collections::HashMap;
use std::sync::Arc;

use crate::layer::{Error, Result};
use crate::managed::SlotMap;

use super::{Connection, ConnectionKey, FourTuple};

/// All connections of a provider, by key and by four tuple.
pub(crate) struct Store {
    connections: SlotMap<Arc<Connection>>,
    by_tuple: HashMap<FourTuple, ConnectionKey>,
}

impl Store {
    pub(crate) fn new(capacity: usize) -> Self {
        Store {
            connections: SlotMap::with_capacity(capacity),
            by_tuple: HashMap::new(),
        }
    }

    pub(crate) fn get(&self, key: ConnectionKey) -> Option<Arc<Connection>> {
        self.connections.get(key.0).cloned()
    }

    /// Allocate a connection for a new four tuple.
    pub(crate) fn insert<F>(&mut self, tuple: FourTuple, create: F) -> Result<Arc<Connection>>
        where F: FnOnce(ConnectionKey) -> Connection
    {
        if self.by_tuple.contains_key(&tuple) {
            return Err(Error::AddressInUse);
        }

        let key = self.connections.next_key().ok_or(Error::Exhausted)?;
        let connection = Arc::new(create(ConnectionKey(key)));
        let inserted = self.connections.insert(connection.clone());
        debug_assert_eq!(inserted, Some(key));
        self.by_tuple.insert(tuple, ConnectionKey(key));
        Ok(connection)
    }

    pub(crate) fn remove(&mut self, key: ConnectionKey) -> Option<Arc<Connection>> {
        let connection = self.connections.remove(key.0)?;
        self.by_tuple.remove(connection.tuple());
        Some(connection)
    }

    pub(crate) fn len(&self) -> usize {
        self.connections.len()
    }

    /// All connections, for a pass that must not hold the store lock.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|(_, connection)| connection.clone()).collect()
    }
}
