use serde_json::Value;
use spin_sdk::key_value::Store;
use std::fmt::Display;

use crate::blobs::{check_upload, Blob, BlobHost};
use crate::config::blob_base_url;
use crate::core::errors::{SocialError, SocialResult};
use crate::core::store::{apply_ops, ChangeHub, ChangeKind, DocumentStore, FieldOp, Query, Subscription};

/// [`DocumentStore`] over the Spin key-value store.
///
/// Each document lives under `"{collection}:{id}"`; `"{collection}_list"` keeps the ids
/// of a collection so it can be scanned. Change events only cover writes made through
/// this handle, which is all a single component instance ever sees.
pub struct SpinKvStore {
    store: Store,
    hub: ChangeHub,
}

fn kv<T, E: Display>(result: Result<T, E>) -> SocialResult<T> {
    result.map_err(|e| SocialError::Transient(anyhow::anyhow!("key-value store: {}", e)))
}

fn doc_key(collection: &str, id: &str) -> String {
    format!("{}:{}", collection, id)
}

fn index_key(collection: &str) -> String {
    format!("{}_list", collection)
}

fn blob_key(path: &str) -> String {
    format!("blob:{}", path)
}

fn blob_type_key(path: &str) -> String {
    format!("blob_type:{}", path)
}

impl SpinKvStore {
    pub fn open_default() -> anyhow::Result<Self> {
        let store = Store::open_default().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(SpinKvStore {
            store,
            hub: ChangeHub::default(),
        })
    }

    fn index(&self, collection: &str) -> SocialResult<Vec<String>> {
        Ok(kv(self.store.get_json::<Vec<String>>(&index_key(collection)))?.unwrap_or_default())
    }

    fn write(&self, collection: &str, id: &str, doc: &Value) -> SocialResult<()> {
        kv(self.store.set_json(&doc_key(collection, id), doc))?;

        let mut ids = self.index(collection)?;
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
            kv(self.store.set_json(&index_key(collection), &ids))?;
        }
        self.hub.publish(collection, id, ChangeKind::Upserted);
        Ok(())
    }
}

impl DocumentStore for SpinKvStore {
    fn get(&self, collection: &str, id: &str) -> SocialResult<Option<Value>> {
        kv(self.store.get_json::<Value>(&doc_key(collection, id)))
    }

    fn set(&self, collection: &str, id: &str, doc: Value) -> SocialResult<()> {
        self.write(collection, id, &doc)
    }

    fn update(&self, collection: &str, id: &str, ops: &[FieldOp]) -> SocialResult<()> {
        let mut doc = DocumentStore::get(self, collection, id)?
            .ok_or_else(|| SocialError::not_found(format!("{}/{}", collection, id)))?;
        apply_ops(&mut doc, ops)?;
        self.write(collection, id, &doc)
    }

    fn delete(&self, collection: &str, id: &str) -> SocialResult<()> {
        kv(self.store.delete(&doc_key(collection, id)))?;

        let mut ids = self.index(collection)?;
        let before = ids.len();
        ids.retain(|existing| existing != id);
        if ids.len() != before {
            kv(self.store.set_json(&index_key(collection), &ids))?;
            self.hub.publish(collection, id, ChangeKind::Deleted);
        }
        Ok(())
    }

    fn query(&self, collection: &str, query: &Query) -> SocialResult<Vec<(String, Value)>> {
        let mut docs = Vec::new();
        for id in self.index(collection)? {
            if let Some(doc) = DocumentStore::get(self, collection, &id)? {
                docs.push((id, doc));
            }
        }
        Ok(query.run(docs))
    }

    fn watch(&self, collections: &[&str]) -> Subscription {
        self.hub.subscribe(collections)
    }
}

/// Images live in the same key-value store, raw bytes under `"blob:{path}"`.
impl BlobHost for SpinKvStore {
    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> SocialResult<String> {
        let path = check_upload(path, content_type)?;
        kv(self.store.set(&blob_key(path), bytes))?;
        kv(self.store.set(&blob_type_key(path), content_type.as_bytes()))?;
        Ok(format!("{}/{}", blob_base_url().trim_end_matches('/'), path))
    }

    fn get(&self, path: &str) -> SocialResult<Option<Blob>> {
        let path = path.trim_matches('/');
        let Some(bytes) = kv(self.store.get(&blob_key(path)))? else {
            return Ok(None);
        };
        let content_type = kv(self.store.get(&blob_type_key(path)))?
            .and_then(|raw| String::from_utf8(raw).ok())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        Ok(Some(Blob { content_type, bytes }))
    }
}
