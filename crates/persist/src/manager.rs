use super::{ConnectionAdapter, Datastore, Error, Persistence, PersistorDefinition};
use pipeline::ExecutionState;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

pub type SharedPersistence = Rc<RefCell<Persistence>>;
pub type SharedDatastore = Rc<RefCell<Datastore>>;

/// PersistenceManager holds one Persistence per logical connection name,
/// and the Datastores created through them.
#[derive(Default)]
pub struct PersistenceManager {
    connections: BTreeMap<String, SharedPersistence>,
    datastores: Vec<SharedDatastore>,
    state: Option<Arc<ExecutionState>>,
}

impl PersistenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&mut self, state: Arc<ExecutionState>) {
        for persistence in self.connections.values() {
            persistence.borrow_mut().set_state(state.clone());
        }
        self.state = Some(state);
    }

    /// Persistence of the adapter's connection, opened on first use.
    pub fn persistence(&mut self, adapter: &dyn ConnectionAdapter) -> Result<SharedPersistence, Error> {
        if let Some(persistence) = self.connections.get(adapter.name()) {
            return Ok(persistence.clone());
        }

        let mut persistence = Persistence::open(adapter)?;
        if let Some(state) = &self.state {
            persistence.set_state(state.clone());
        }
        let persistence = Rc::new(RefCell::new(persistence));
        self.connections
            .insert(adapter.name().to_string(), persistence.clone());

        tracing::debug!(connection = adapter.name(), "opened persistence");
        Ok(persistence)
    }

    /// Use a Persistence opened by another manager for connection `name`.
    /// Adopted connections are committed, but not closed, when this manager is cleared.
    pub fn adopt(&mut self, name: &str, persistence: SharedPersistence) {
        self.connections
            .entry(name.to_string())
            .or_insert(persistence);
    }

    /// New Datastore writing `definition` through the adapter's connection.
    pub fn provide(
        &mut self,
        adapter: &dyn ConnectionAdapter,
        definition: PersistorDefinition,
    ) -> Result<SharedDatastore, Error> {
        let persistence = self.persistence(adapter)?;
        let datastore = Rc::new(RefCell::new(Datastore::new(persistence, definition)?));
        self.datastores.push(datastore.clone());
        Ok(datastore)
    }

    pub fn connection_names(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    pub fn commit_all(&mut self) -> Result<(), Error> {
        for persistence in self.connections.values() {
            persistence.borrow_mut().commit_all()?;
        }
        Ok(())
    }

    /// Close all Datastores, then commit every connection. Connections named
    /// in `kept` stay open for reuse. All others are closed.
    pub fn clear(&mut self, kept: &[&str]) -> Result<(), Error> {
        for datastore in self.datastores.drain(..) {
            datastore.borrow_mut().close()?;
        }

        let connections = std::mem::take(&mut self.connections);
        for (name, persistence) in connections {
            if kept.contains(&name.as_str()) {
                persistence.borrow_mut().commit_all()?;
                self.connections.insert(name, persistence);
                continue;
            }
            match Rc::try_unwrap(persistence) {
                Ok(persistence) => persistence.into_inner().close()?,
                // Still referenced by a reader: commit and let the last owner close it.
                Err(persistence) => persistence.borrow_mut().commit_all()?,
            }
            tracing::debug!(connection = %name, "released connection");
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{SqliteAdapter, Target};
    use row::Column;

    #[test]
    fn test_connections_are_shared_per_name() {
        let mut manager = PersistenceManager::new();
        let adapter = SqliteAdapter::new("warehouse");

        let first = manager.persistence(&adapter).unwrap();
        let second = manager.persistence(&adapter).unwrap();
        assert!(Rc::ptr_eq(&first, &second));

        let other = manager.persistence(&SqliteAdapter::new("scratch")).unwrap();
        assert!(!Rc::ptr_eq(&first, &other));
        assert_eq!(manager.connection_names().collect::<Vec<_>>(), vec!["scratch", "warehouse"]);

        drop((first, second, other));
        manager.clear(&["warehouse"]).unwrap();
        assert_eq!(manager.connection_names().collect::<Vec<_>>(), vec!["warehouse"]);
    }

    #[test]
    fn test_clear_closes_datastores() {
        let mut manager = PersistenceManager::new();
        let definition = PersistorDefinition::new(Target::new("t"), vec![Column::new("a")]);
        let store = manager
            .provide(&SqliteAdapter::new("db"), definition)
            .unwrap();

        manager.clear(&[]).unwrap();
        assert!(store.borrow().is_closed());
        assert_eq!(manager.connection_names().count(), 0);
    }
}
