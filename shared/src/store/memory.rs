use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use super::{Collection, Document, Filter, Store, StoreError, WriteOp};

type Tables = HashMap<Collection, BTreeMap<String, Document>>;

/// In-process [`Store`] used by tests and `STORE_BACKEND=memory` runs.
///
/// Writes to a collection can be made to fail with
/// [`MemoryStore::fail_writes_to`], which is how the atomic branch paths are
/// exercised: a transaction touching a failing collection leaves every
/// collection untouched.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    failing: Mutex<HashSet<Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes_to(&self, collection: Collection) {
        self.failing_set().insert(collection);
    }

    pub fn clear_failures(&self) {
        self.failing_set().clear();
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.read().get(&collection).map(BTreeMap::len).unwrap_or(0)
    }

    fn failing_set(&self) -> std::sync::MutexGuard<'_, HashSet<Collection>> {
        self.failing.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_writable(&self, collection: Collection) -> Result<(), StoreError> {
        if self.failing_set().contains(&collection) {
            return Err(StoreError::Backend(format!(
                "injected write failure for {}",
                collection.as_str()
            )));
        }
        Ok(())
    }

    fn matching(&self, collection: Collection, filter: &Filter) -> Vec<Document> {
        self.read()
            .get(&collection)
            .map(|table| {
                table
                    .values()
                    .filter(|document| filter.matches(document))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        Ok(self.matching(collection, filter))
    }

    async fn find_by_id(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self.read().get(&collection).and_then(|table| table.get(id)).cloned())
    }

    async fn create(
        &self,
        collection: Collection,
        id: &str,
        document: Document,
    ) -> Result<(), StoreError> {
        self.check_writable(collection)?;
        let mut tables = self.write();
        let table = tables.entry(collection).or_default();
        if table.contains_key(id) {
            return Err(StoreError::AlreadyExists(format!("{}#{}", collection.as_str(), id)));
        }
        table.insert(id.to_string(), document);
        Ok(())
    }

    async fn update_by_id(
        &self,
        collection: Collection,
        id: &str,
        document: Document,
    ) -> Result<bool, StoreError> {
        self.check_writable(collection)?;
        let mut tables = self.write();
        match tables.get_mut(&collection).and_then(|table| table.get_mut(id)) {
            Some(existing) => {
                *existing = document;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_by_id(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        self.check_writable(collection)?;
        Ok(self.write().get_mut(&collection).and_then(|table| table.remove(id)))
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self.matching(collection, filter).len() as u64)
    }

    async fn aggregate_sum(
        &self,
        collection: Collection,
        filter: &Filter,
        field: &str,
    ) -> Result<f64, StoreError> {
        Ok(self
            .matching(collection, filter)
            .iter()
            .filter_map(|document| document.get(field).and_then(Value::as_f64))
            .sum())
    }

    async fn transact(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        for op in &ops {
            self.check_writable(op.collection())
                .map_err(|e| StoreError::TransactionCancelled(e.to_string()))?;
        }

        // Single write guard for the whole batch: readers never observe a partial transaction.
        let mut tables = self.write();
        for op in &ops {
            if let WriteOp::Replace { collection, id, .. } = op {
                if !tables.get(collection).is_some_and(|table| table.contains_key(id)) {
                    return Err(StoreError::TransactionCancelled(format!(
                        "{}#{} no longer exists",
                        collection.as_str(),
                        id
                    )));
                }
            }
        }
        for op in ops {
            match op {
                WriteOp::Put {
                    collection,
                    id,
                    document,
                }
                | WriteOp::Replace {
                    collection,
                    id,
                    document,
                } => {
                    tables.entry(collection).or_default().insert(id, document);
                }
                WriteOp::Delete { collection, id } => {
                    if let Some(table) = tables.get_mut(&collection) {
                        table.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }
}
