use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use aws_sdk_dynamodb::operation::get_item::builders::GetItemFluentBuilder;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::scan::builders::ScanFluentBuilder;
use aws_sdk_dynamodb::types::{AttributeValue, Delete, Put, ReturnValue, Select, TransactWriteItem};
use aws_sdk_dynamodb::Client as DynamoClient;
use serde_json::Value;

use super::{Collection, Document, Filter, Store, StoreError, WriteOp};

const SK_METADATA: &str = "METADATA";
// DynamoDB caps TransactWriteItems at 100 operations.
const MAX_TRANSACT_ITEMS: usize = 100;

type Item = HashMap<String, AttributeValue>;

/// Single-table DynamoDB backend.
///
/// Every record is one item: `PK = <ENTITY>#<id>`, `SK = METADATA`, an
/// `entity_type` attribute, and the document fields as native attributes.
/// Filtered reads are paginated scans on `entity_type`.
pub struct DynamoStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoStore {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    async fn scan(
        &self,
        collection: Collection,
        filter: &Filter,
        select: Option<Select>,
    ) -> Result<(Vec<Document>, u64), StoreError> {
        let (expression, names, values) = filter_expression(collection, filter);

        let mut documents = Vec::new();
        let mut counted = 0u64;
        let mut start_key: Option<Item> = None;
        loop {
            let output = self
                .scan_request()
                .filter_expression(expression.clone())
                .set_expression_attribute_names(Some(names.clone()))
                .set_expression_attribute_values(Some(values.clone()))
                .set_select(select.clone())
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| {
                    let detail = DisplayErrorContext(&e);
                    tracing::error!("DynamoDB scan failed for {}: {}", collection.as_str(), detail);
                    StoreError::Backend(format!("scan {}: {}", collection.as_str(), detail))
                })?;

            counted += output.count().max(0) as u64;
            documents.extend(output.items().iter().map(item_to_document));

            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }
        Ok((documents, counted))
    }

    // Reads are strongly consistent so a request always sees the writes
    // that preceded it.
    fn scan_request(&self) -> ScanFluentBuilder {
        self.client.scan().table_name(&self.table_name).consistent_read(true)
    }

    fn get_request(&self, collection: Collection, id: &str) -> GetItemFluentBuilder {
        self.client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(item_key(collection, id)))
            .consistent_read(true)
    }

    fn transact_item(&self, op: WriteOp) -> Result<TransactWriteItem, StoreError> {
        let item = match op {
            WriteOp::Put { collection, id, document } => {
                let put = Put::builder()
                    .table_name(&self.table_name)
                    .set_item(Some(document_to_item(collection, &id, &document)))
                    .build()
                    .map_err(|e| {
                        let key = partition_key(collection, &id);
                        StoreError::Backend(format!("build put {}: {}", key, e))
                    })?;
                TransactWriteItem::builder().put(put).build()
            }
            WriteOp::Replace { collection, id, document } => {
                let put = Put::builder()
                    .table_name(&self.table_name)
                    .set_item(Some(document_to_item(collection, &id, &document)))
                    .condition_expression("attribute_exists(PK)")
                    .build()
                    .map_err(|e| {
                        let key = partition_key(collection, &id);
                        StoreError::Backend(format!("build replace {}: {}", key, e))
                    })?;
                TransactWriteItem::builder().put(put).build()
            }
            WriteOp::Delete { collection, id } => {
                let delete = Delete::builder()
                    .table_name(&self.table_name)
                    .set_key(Some(item_key(collection, &id)))
                    .build()
                    .map_err(|e| {
                        let key = partition_key(collection, &id);
                        StoreError::Backend(format!("build delete {}: {}", key, e))
                    })?;
                TransactWriteItem::builder().delete(delete).build()
            }
        };
        Ok(item)
    }
}

#[async_trait]
impl Store for DynamoStore {
    async fn find(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        Ok(self.scan(collection, filter, None).await?.0)
    }

    async fn find_by_id(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let result = self
            .get_request(collection, id)
            .send()
            .await
            .map_err(|e| backend_error("get", collection, id, &e))?;

        Ok(result.item().map(item_to_document))
    }

    async fn create(
        &self,
        collection: Collection,
        id: &str,
        document: Document,
    ) -> Result<(), StoreError> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(document_to_item(collection, id, &document)))
            .condition_expression("attribute_not_exists(PK)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if condition_failed(&e) => {
                Err(StoreError::AlreadyExists(partition_key(collection, id)))
            }
            Err(e) => Err(backend_error("put", collection, id, &e)),
        }
    }

    async fn update_by_id(
        &self,
        collection: Collection,
        id: &str,
        document: Document,
    ) -> Result<bool, StoreError> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(document_to_item(collection, id, &document)))
            .condition_expression("attribute_exists(PK)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if condition_failed(&e) => Ok(false),
            Err(e) => Err(backend_error("replace", collection, id, &e)),
        }
    }

    async fn delete_by_id(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(item_key(collection, id)))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| backend_error("delete", collection, id, &e))?;

        Ok(result.attributes().filter(|item| !item.is_empty()).map(item_to_document))
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self.scan(collection, filter, Some(Select::Count)).await?.1)
    }

    async fn aggregate_sum(
        &self,
        collection: Collection,
        filter: &Filter,
        field: &str,
    ) -> Result<f64, StoreError> {
        let (documents, _) = self.scan(collection, filter, None).await?;
        Ok(documents
            .iter()
            .filter_map(|document| document.get(field).and_then(Value::as_f64))
            .sum())
    }

    async fn transact(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        if ops.len() > MAX_TRANSACT_ITEMS {
            return Err(StoreError::Backend(format!(
                "transaction of {} writes exceeds the limit of {}",
                ops.len(),
                MAX_TRANSACT_ITEMS
            )));
        }

        let items = ops
            .into_iter()
            .map(|op| self.transact_item(op))
            .collect::<Result<Vec<_>, _>>()?;

        let result = self
            .client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e)
                if e.as_service_error().is_some_and(|se| se.is_transaction_canceled_exception()) =>
            {
                Err(StoreError::TransactionCancelled(DisplayErrorContext(&e).to_string()))
            }
            Err(e) => Err(StoreError::Backend(format!("transact: {}", DisplayErrorContext(&e)))),
        }
    }
}

fn condition_failed<R>(err: &SdkError<PutItemError, R>) -> bool {
    err.as_service_error()
        .is_some_and(PutItemError::is_conditional_check_failed_exception)
}

fn backend_error<E: std::error::Error>(
    action: &str,
    collection: Collection,
    id: &str,
    err: &E,
) -> StoreError {
    StoreError::Backend(format!(
        "{} {}: {}",
        action,
        partition_key(collection, id),
        DisplayErrorContext(err)
    ))
}

fn partition_key(collection: Collection, id: &str) -> String {
    format!("{}#{}", collection.as_str(), id)
}

fn item_key(collection: Collection, id: &str) -> Item {
    let mut key = HashMap::new();
    key.insert("PK".to_string(), AttributeValue::S(partition_key(collection, id)));
    key.insert("SK".to_string(), AttributeValue::S(SK_METADATA.to_string()));
    key
}

fn document_to_item(collection: Collection, id: &str, document: &Document) -> Item {
    let mut item = item_key(collection, id);
    item.insert("entity_type".to_string(), AttributeValue::S(collection.as_str().to_string()));
    for (field, value) in document {
        item.insert(field.clone(), value_to_attribute(value));
    }
    item
}

fn item_to_document(item: &Item) -> Document {
    item.iter()
        .filter(|(name, _)| !matches!(name.as_str(), "PK" | "SK" | "entity_type"))
        .map(|(name, attribute)| (name.clone(), attribute_to_value(attribute)))
        .collect()
}

fn value_to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(values) => AttributeValue::L(values.iter().map(value_to_attribute).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_attribute(v)))
                .collect(),
        ),
    }
}

fn attribute_to_value(attribute: &AttributeValue) -> Value {
    match attribute {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => n
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| n.parse::<f64>().map(Value::from))
            .unwrap_or(Value::Null),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::L(values) => Value::Array(values.iter().map(attribute_to_value).collect()),
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), attribute_to_value(v)))
                .collect(),
        ),
        // Binary and set attributes are never written by this service.
        _ => Value::Null,
    }
}

/// Builds `entity_type = :et AND ...` for a scan. A `null` condition also
/// matches items where the attribute is absent.
fn filter_expression(
    collection: Collection,
    filter: &Filter,
) -> (String, HashMap<String, String>, Item) {
    let mut clauses = vec!["entity_type = :et".to_string()];
    let mut names = HashMap::new();
    let mut values = HashMap::new();
    values.insert(":et".to_string(), AttributeValue::S(collection.as_str().to_string()));

    for (index, (field, expected)) in filter.conditions().iter().enumerate() {
        let name = format!("#f{}", index);
        let placeholder = format!(":v{}", index);
        if expected.is_null() {
            clauses.push(format!("(attribute_not_exists({name}) OR {name} = {placeholder})"));
        } else {
            clauses.push(format!("{name} = {placeholder}"));
        }
        names.insert(name, field.clone());
        values.insert(placeholder, value_to_attribute(expected));
    }

    (clauses.join(" AND "), names, values)
}
