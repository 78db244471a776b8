use std::collections::HashMap;
use std::collections::hash_map::Entry;

use super::types::{ClientConnection, ClientId, SignalingError};

/// Connected clients keyed by id.
///
/// Owned by the router actor; every access goes through that single task.
#[derive(Debug, Default)]
pub struct Registry {
    clients: HashMap<ClientId, ClientConnection>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: ClientId,
        connection: ClientConnection,
    ) -> Result<(), SignalingError> {
        match self.clients.entry(id) {
            Entry::Occupied(entry) => Err(SignalingError::DuplicateClient(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(connection);
                Ok(())
            }
        }
    }

    /// Returns whether the id was present.
    pub fn unregister(&mut self, id: &ClientId) -> bool {
        self.clients.remove(id).is_some()
    }

    pub fn lookup(&self, id: &ClientId) -> Option<&ClientConnection> {
        self.clients.get(id)
    }

    /// Ids of all connected clients and their count.
    pub fn snapshot(&self) -> (Vec<ClientId>, usize) {
        let ids: Vec<ClientId> = self.clients.keys().cloned().collect();
        let count = ids.len();
        (ids, count)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientId, &ClientConnection)> {
        self.clients.iter()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
