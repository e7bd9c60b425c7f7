//! Document storage behind one interface.
//!
//! Records are stored as JSON objects keyed by collection and id. The
//! production backend is a single DynamoDB table ([`dynamo::DynamoStore`]);
//! [`memory::MemoryStore`] holds the same documents in process for tests and
//! local runs. Services talk to `&dyn Store` and use the typed helpers at the
//! bottom of this module to move between documents and domain records.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::{Branch, Donation, Need, Student, User};

pub mod dynamo;
pub mod memory;

pub type Document = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Users,
    Branches,
    Students,
    Donations,
    Needs,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Users,
        Collection::Branches,
        Collection::Students,
        Collection::Donations,
        Collection::Needs,
    ];

    /// Entity prefix used in partition keys and the `entity_type` attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "USER",
            Collection::Branches => "BRANCH",
            Collection::Students => "STUDENT",
            Collection::Donations => "DONATION",
            Collection::Needs => "NEED",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("transaction cancelled: {0}")]
    TransactionCancelled(String),
    #[error("record {0} already exists")]
    AlreadyExists(String),
    #[error("malformed record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Equality filter over top-level document fields. An empty filter matches
/// every document in the collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((field.to_string(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| document.get(field).unwrap_or(&Value::Null) == expected)
    }
}

/// One write inside an atomic [`Store::transact`] call.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put {
        collection: Collection,
        id: String,
        document: Document,
    },
    /// Overwrites a record that must still exist; the transaction is
    /// cancelled otherwise.
    Replace {
        collection: Collection,
        id: String,
        document: Document,
    },
    Delete {
        collection: Collection,
        id: String,
    },
}

impl WriteOp {
    pub fn collection(&self) -> Collection {
        match self {
            WriteOp::Put { collection, .. }
            | WriteOp::Replace { collection, .. }
            | WriteOp::Delete { collection, .. } => *collection,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn find(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError>;

    async fn find_by_id(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Document>, StoreError>;

    /// Fails with [`StoreError::AlreadyExists`] when the id is taken.
    async fn create(
        &self,
        collection: Collection,
        id: &str,
        document: Document,
    ) -> Result<(), StoreError>;

    /// Replaces an existing document. Returns `false` when there was nothing to replace.
    async fn update_by_id(
        &self,
        collection: Collection,
        id: &str,
        document: Document,
    ) -> Result<bool, StoreError>;

    /// Returns the removed document, if any.
    async fn delete_by_id(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Document>, StoreError>;

    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError>;

    /// Sum of a numeric field over matching documents; non-numeric or
    /// missing values count as zero.
    async fn aggregate_sum(
        &self,
        collection: Collection,
        filter: &Filter,
        field: &str,
    ) -> Result<f64, StoreError>;

    /// Applies every op or none of them.
    async fn transact(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;
}

/// A domain record persisted in one collection.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: Collection;

    fn id(&self) -> &str;
}

impl Entity for User {
    const COLLECTION: Collection = Collection::Users;
    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for Branch {
    const COLLECTION: Collection = Collection::Branches;
    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for Student {
    const COLLECTION: Collection = Collection::Students;
    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for Donation {
    const COLLECTION: Collection = Collection::Donations;
    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for Need {
    const COLLECTION: Collection = Collection::Needs;
    fn id(&self) -> &str {
        &self.id
    }
}

pub fn to_document<T: Entity>(entity: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Backend(format!(
            "{} record serialised to a non-object: {}",
            T::COLLECTION.as_str(),
            other
        ))),
    }
}

pub fn from_document<T: Entity>(document: Document) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

pub async fn fetch<T: Entity>(store: &dyn Store, id: &str) -> Result<Option<T>, StoreError> {
    store
        .find_by_id(T::COLLECTION, id)
        .await?
        .map(from_document)
        .transpose()
}

pub async fn fetch_all<T: Entity>(
    store: &dyn Store,
    filter: &Filter,
) -> Result<Vec<T>, StoreError> {
    store
        .find(T::COLLECTION, filter)
        .await?
        .into_iter()
        .map(from_document)
        .collect()
}

pub async fn insert<T: Entity>(store: &dyn Store, entity: &T) -> Result<(), StoreError> {
    store.create(T::COLLECTION, entity.id(), to_document(entity)?).await
}

pub async fn replace<T: Entity>(store: &dyn Store, entity: &T) -> Result<bool, StoreError> {
    store.update_by_id(T::COLLECTION, entity.id(), to_document(entity)?).await
}

pub fn put_op<T: Entity>(entity: &T) -> Result<WriteOp, StoreError> {
    Ok(WriteOp::Put {
        collection: T::COLLECTION,
        id: entity.id().to_string(),
        document: to_document(entity)?,
    })
}

pub fn replace_op<T: Entity>(entity: &T) -> Result<WriteOp, StoreError> {
    Ok(WriteOp::Replace {
        collection: T::COLLECTION,
        id: entity.id().to_string(),
        document: to_document(entity)?,
    })
}

pub fn delete_op<T: Entity>(id: &str) -> WriteOp {
    WriteOp::Delete {
        collection: T::COLLECTION,
        id: id.to_string(),
    }
}
