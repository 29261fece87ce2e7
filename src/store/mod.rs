pub mod disk;
pub mod memory;

use crate::core::cache::{KeyValueCollection, Store};
use disk::DiskCollection;
use fjall::{Keyspace, PartitionCreateOptions};
use memory::MemoryCollection;
use std::{
    any::Any,
    collections::HashMap,
    path::Path,
    sync::{Arc, RwLock},
};

/// A thread-safe key-value store that can hold multiple collections.
///
/// Persistent collections map to fjall partitions under the data path;
/// memory collections back the short-TTL settings cache. Without a usable
/// data path the store still works, minus persistence.
pub struct KeyValueStore {
    collections: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    keyspace: Option<Arc<Keyspace>>,
}

impl KeyValueStore {
    pub fn open(data_path: &Path) -> Self {
        let keyspace = fjall::Config::new(data_path.join("cache"))
            .open()
            .ok()
            .map(Arc::new);

        Self {
            collections: RwLock::new(HashMap::new()),
            keyspace,
        }
    }

    /// Memory-only store, used when no data path is available.
    pub fn ephemeral() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            keyspace: None,
        }
    }
}

impl Store for KeyValueStore {
    fn get_collection(
        &self,
        name: &str,
        persist: bool,
        create_if_missing: bool,
    ) -> Option<Arc<dyn KeyValueCollection>> {
        if create_if_missing {
            let mut collections = self.collections.write().unwrap();
            if !collections.contains_key(name) {
                let new_collection: Option<Arc<dyn Any + Send + Sync>> = if persist {
                    self.keyspace.as_ref().and_then(|ks| {
                        ks.open_partition(name, PartitionCreateOptions::default())
                            .ok()
                            .map(|partition| {
                                Arc::new(DiskCollection::new(partition))
                                    as Arc<dyn Any + Send + Sync>
                            })
                    })
                } else {
                    Some(Arc::new(MemoryCollection::new()))
                };

                if let Some(collection) = new_collection {
                    collections.insert(name.to_string(), collection);
                } else if persist {
                    return None; // Failed to create persistent collection
                }
            }
        }

        let collections = self.collections.read().unwrap();
        collections
            .get(name)
            .cloned()
            .map(|collection| -> Arc<dyn KeyValueCollection> {
                if persist {
                    collection.downcast::<DiskCollection>().unwrap()
                } else {
                    collection.downcast::<MemoryCollection>().unwrap()
                }
            })
    }

    fn remove_collection(&self, name: &str) -> bool {
        let mut collections = self.collections.write().unwrap();
        collections.remove(name).is_some()
    }
}
