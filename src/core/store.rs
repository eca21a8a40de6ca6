//! Document store seam.
//!
//! Documents are JSON objects grouped by collection name (`users`, `posts`,
//! `posts/{id}/comments`). Updates are field-level merges so that two writers touching
//! different fields of the same document never clobber each other.

use log::debug;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::errors::{SocialError, SocialResult};

/// A single field mutation. Paths are dotted (`friendRequests.sent`).
#[derive(Clone, Debug, PartialEq)]
pub enum FieldOp {
    Set(String, Value),
    /// Add to an array if not already present.
    ArrayUnion(String, Value),
    /// Remove every occurrence; absent is a no-op.
    ArrayRemove(String, Value),
    /// Add to a number; a missing field counts as zero.
    Increment(String, i64),
}

impl FieldOp {
    pub fn set(path: &str, value: impl Into<Value>) -> Self {
        FieldOp::Set(path.to_string(), value.into())
    }

    pub fn union(path: &str, value: &str) -> Self {
        FieldOp::ArrayUnion(path.to_string(), Value::String(value.to_string()))
    }

    pub fn remove(path: &str, value: &str) -> Self {
        FieldOp::ArrayRemove(path.to_string(), Value::String(value.to_string()))
    }

    pub fn increment(path: &str, by: i64) -> Self {
        FieldOp::Increment(path.to_string(), by)
    }
}

/// Applies `ops` in order to `doc`. Either every op applies or `doc` is left untouched.
pub fn apply_ops(doc: &mut Value, ops: &[FieldOp]) -> SocialResult<()> {
    let mut next = doc.clone();
    for op in ops {
        match op {
            FieldOp::Set(path, value) => {
                *slot(&mut next, path)? = value.clone();
            }
            FieldOp::ArrayUnion(path, value) => {
                let items = array_slot(&mut next, path)?;
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
            FieldOp::ArrayRemove(path, value) => {
                array_slot(&mut next, path)?.retain(|v| v != value);
            }
            FieldOp::Increment(path, by) => {
                let field = slot(&mut next, path)?;
                let current = if field.is_null() {
                    0
                } else {
                    field.as_i64().ok_or_else(|| {
                        SocialError::validation(format!("{} is not an integer", path))
                    })?
                };
                let total = current
                    .checked_add(*by)
                    .ok_or_else(|| SocialError::validation(format!("{} would overflow", path)))?;
                *field = Value::from(total);
            }
        }
    }
    *doc = next;
    Ok(())
}

fn slot<'a>(doc: &'a mut Value, path: &str) -> SocialResult<&'a mut Value> {
    let mut cur = doc;
    for key in path.split('.') {
        if cur.is_null() {
            *cur = Value::Object(Map::new());
        }
        let map = cur
            .as_object_mut()
            .ok_or_else(|| SocialError::validation(format!("{} crosses a non-map field", path)))?;
        cur = map.entry(key.to_string()).or_insert(Value::Null);
    }
    Ok(cur)
}

fn array_slot<'a>(doc: &'a mut Value, path: &str) -> SocialResult<&'a mut Vec<Value>> {
    let field = slot(doc, path)?;
    if field.is_null() {
        *field = Value::Array(Vec::new());
    }
    field
        .as_array_mut()
        .ok_or_else(|| SocialError::validation(format!("{} is not an array", path)))
}

pub fn field<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |cur, key| cur.get(key))
}

/// Equality filters, an optional ordering field and a limit.
#[derive(Clone, Debug, Default)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<String>,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.filters.push((path.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, path: &str, descending: bool) -> Self {
        self.order_by = Some(path.to_string());
        self.descending = descending;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    fn matches(&self, doc: &Value) -> bool {
        self.filters
            .iter()
            .all(|(path, expected)| field(doc, path) == Some(expected))
    }

    /// Filters, sorts and truncates `docs`. Ties on the ordering field fall back to the
    /// document id so the result is a total order.
    pub fn run<I>(&self, docs: I) -> Vec<(String, Value)>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut hits: Vec<(String, Value)> =
            docs.into_iter().filter(|(_, doc)| self.matches(doc)).collect();

        hits.sort_by(|(a_id, a), (b_id, b)| {
            let by_field = match &self.order_by {
                Some(path) => {
                    let ord = compare_values(field(a, path), field(b, path));
                    if self.descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                }
                None => Ordering::Equal,
            };
            by_field.then_with(|| a_id.cmp(b_id))
        });

        if let Some(n) = self.limit {
            hits.truncate(n);
        }
        hits
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Upserted,
    Deleted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub collection: String,
    pub id: String,
    pub kind: ChangeKind,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fan-out of change events to per-collection subscribers.
#[derive(Clone, Default)]
pub struct ChangeHub {
    subscribers: Arc<Mutex<Vec<(Vec<String>, Sender<ChangeEvent>)>>>,
}

impl ChangeHub {
    pub fn subscribe(&self, collections: &[&str]) -> Subscription {
        let collections: Vec<String> = collections.iter().map(|c| c.to_string()).collect();
        let (tx, rx) = mpsc::channel();
        locked(&self.subscribers).push((collections.clone(), tx));
        Subscription {
            collections,
            rx,
            hub: self.clone(),
        }
    }

    pub fn publish(&self, collection: &str, id: &str, kind: ChangeKind) {
        let event = ChangeEvent {
            collection: collection.to_string(),
            id: id.to_string(),
            kind,
        };
        // Dropped subscriptions fall out here.
        locked(&self.subscribers).retain(|(watched, tx)| {
            !watched.iter().any(|c| c == collection) || tx.send(event.clone()).is_ok()
        });
    }
}

/// Unbounded stream of changes to a set of collections. Iterating blocks until the next
/// change.
pub struct Subscription {
    collections: Vec<String>,
    rx: Receiver<ChangeEvent>,
    hub: ChangeHub,
}

impl Subscription {
    /// Blocks for one change, then drains whatever else is already queued.
    pub fn next_batch(&self) -> Option<Vec<ChangeEvent>> {
        let first = self.rx.recv().ok()?;
        let mut batch = vec![first];
        batch.extend(self.rx.try_iter());
        Some(batch)
    }

    /// Everything queued right now, without blocking.
    pub fn pending(&self) -> Vec<ChangeEvent> {
        self.rx.try_iter().collect()
    }

    /// A fresh subscription on the same collections, starting from now.
    pub fn restart(&self) -> Subscription {
        let collections: Vec<&str> = self.collections.iter().map(String::as_str).collect();
        self.hub.subscribe(&collections)
    }
}

impl Iterator for Subscription {
    type Item = ChangeEvent;

    fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().ok()
    }
}

/// The five primitives the social core consumes.
pub trait DocumentStore {
    fn get(&self, collection: &str, id: &str) -> SocialResult<Option<Value>>;

    /// Whole-document create or replace.
    fn set(&self, collection: &str, id: &str, doc: Value) -> SocialResult<()>;

    /// Field-level merge into an existing document, atomic per document.
    fn update(&self, collection: &str, id: &str, ops: &[FieldOp]) -> SocialResult<()>;

    fn delete(&self, collection: &str, id: &str) -> SocialResult<()>;

    fn query(&self, collection: &str, query: &Query) -> SocialResult<Vec<(String, Value)>>;

    fn watch(&self, collections: &[&str]) -> Subscription;

    fn find_by_field(
        &self,
        collection: &str,
        path: &str,
        value: Value,
    ) -> SocialResult<Vec<(String, Value)>> {
        self.query(collection, &Query::new().where_eq(path, value))
    }
}

/// Typed access on top of any [`DocumentStore`].
pub trait JsonDocuments: DocumentStore {
    fn get_json<T: DeserializeOwned>(&self, collection: &str, id: &str) -> SocialResult<Option<T>> {
        match self.get(collection, id)? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, collection: &str, id: &str, value: &T) -> SocialResult<()> {
        self.set(collection, id, serde_json::to_value(value)?)
    }

    fn query_json<T: DeserializeOwned>(&self, collection: &str, query: &Query) -> SocialResult<Vec<T>> {
        self.query(collection, query)?
            .into_iter()
            .map(|(_, doc)| serde_json::from_value(doc).map_err(SocialError::from))
            .collect()
    }
}

impl<S: DocumentStore + ?Sized> JsonDocuments for S {}

type Collections = HashMap<String, BTreeMap<String, Value>>;

/// In-process store. Cloning shares the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Arc<Mutex<Collections>>,
    failures: Arc<Mutex<Vec<(String, String)>>>,
    hub: ChangeHub,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next write to `collection/id` fail as if the store were unreachable.
    /// An id of `*` matches any document in the collection.
    pub fn fail_next_write(&self, collection: &str, id: &str) {
        locked(&self.failures).push((collection.to_string(), id.to_string()));
    }

    /// Drops any injected failure that has not fired yet.
    pub fn clear_failures(&self) {
        locked(&self.failures).clear();
    }

    fn take_failure(&self, collection: &str, id: &str) -> SocialResult<()> {
        let mut failures = locked(&self.failures);
        if let Some(pos) = failures
            .iter()
            .position(|(c, i)| c == collection && (i == id || i == "*"))
        {
            failures.remove(pos);
            return Err(SocialError::Transient(anyhow::anyhow!(
                "write to {}/{} timed out",
                collection,
                id
            )));
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, collection: &str, id: &str) -> SocialResult<Option<Value>> {
        Ok(locked(&self.collections)
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    fn set(&self, collection: &str, id: &str, doc: Value) -> SocialResult<()> {
        self.take_failure(collection, id)?;
        locked(&self.collections)
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        self.hub.publish(collection, id, ChangeKind::Upserted);
        Ok(())
    }

    fn update(&self, collection: &str, id: &str, ops: &[FieldOp]) -> SocialResult<()> {
        self.take_failure(collection, id)?;
        {
            let mut collections = locked(&self.collections);
            let doc = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| SocialError::not_found(format!("{}/{}", collection, id)))?;
            apply_ops(doc, ops)?;
        }
        debug!("merged {} field ops into {}/{}", ops.len(), collection, id);
        self.hub.publish(collection, id, ChangeKind::Upserted);
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> SocialResult<()> {
        self.take_failure(collection, id)?;
        let removed = locked(&self.collections)
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if removed {
            self.hub.publish(collection, id, ChangeKind::Deleted);
        }
        Ok(())
    }

    fn query(&self, collection: &str, query: &Query) -> SocialResult<Vec<(String, Value)>> {
        let docs: Vec<(String, Value)> = locked(&self.collections)
            .get(collection)
            .map(|docs| docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        Ok(query.run(docs))
    }

    fn watch(&self, collections: &[&str]) -> Subscription {
        self.hub.subscribe(collections)
    }
}
