//! In-memory document collections keyed by [`ObjectId`].
//!
//! Stands in for the document database the pages read from. Routes are bound
//! to a collection name; unbound routes read the collection named after the
//! route itself. `insert` is the mutation entrypoint: a record it adds is
//! visible to the next `list_known_ids` call.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use kiln_core::{ConfigError, DataError, IdCodec, KilnResult, ObjectId, ObjectIdCodec, RouteId};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::source::{DataSource, RawRecord};

type Collection = BTreeMap<ObjectId, Map<String, Value>>;

/// Thread-safe in-memory data source.
#[derive(Debug)]
pub struct InMemoryDataSource {
    collections: RwLock<HashMap<String, Collection>>,
    bindings: HashMap<RouteId, String>,
    available: AtomicBool,
    process: [u8; 5],
    counter: AtomicU32,
}

impl Default for InMemoryDataSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        let seed = Uuid::new_v4();
        let bytes = seed.as_bytes();
        let mut process = [0u8; 5];
        process.copy_from_slice(&bytes[0..5]);
        let counter = u32::from_be_bytes([0, bytes[5], bytes[6], bytes[7]]);
        Self {
            collections: RwLock::new(HashMap::new()),
            bindings: HashMap::new(),
            available: AtomicBool::new(true),
            process,
            counter: AtomicU32::new(counter),
        }
    }

    /// Read `route` from `collection`.
    pub fn bind(mut self, route: impl Into<RouteId>, collection: impl Into<String>) -> Self {
        self.bindings.insert(route.into(), collection.into());
        self
    }

    /// Load records from a JSON seed document.
    ///
    /// The document maps collection names to arrays of objects. An object's
    /// `_id`, when present, must be a 24-character hex ObjectId; otherwise
    /// one is minted.
    ///
    /// ```json
    /// { "meetups": [ { "title": "First Meetup", "address": "Some street 5" } ] }
    /// ```
    pub fn load_seed(&self, raw: &str) -> KilnResult<usize> {
        let seed: Map<String, Value> = serde_json::from_str(raw).map_err(|e| ConfigError::Parse {
            reason: format!("seed: {}", e),
        })?;

        let mut loaded = 0;
        for (collection, records) in seed {
            let records = match records {
                Value::Array(records) => records,
                other => {
                    return Err(ConfigError::InvalidValue {
                        field: format!("seed.{}", collection),
                        value: other.to_string(),
                        reason: "expected an array of records".to_string(),
                    }
                    .into())
                }
            };
            for record in records {
                let mut fields = match record {
                    Value::Object(fields) => fields,
                    other => {
                        return Err(ConfigError::InvalidValue {
                            field: format!("seed.{}", collection),
                            value: other.to_string(),
                            reason: "expected an object".to_string(),
                        }
                        .into())
                    }
                };
                let id = match fields.remove("_id") {
                    Some(Value::String(raw)) => ObjectIdCodec::decode(&raw)?,
                    Some(other) => {
                        return Err(ConfigError::InvalidValue {
                            field: format!("seed.{}._id", collection),
                            value: other.to_string(),
                            reason: "expected a hex string".to_string(),
                        }
                        .into())
                    }
                    None => self.next_id(),
                };
                self.write_collection(&collection, |docs| {
                    docs.insert(id, fields);
                })?;
                loaded += 1;
            }
        }
        tracing::debug!(records = loaded, "Loaded seed records");
        Ok(loaded)
    }

    /// Insert a record for `route`, minting its identifier.
    pub fn insert(&self, route: &RouteId, fields: Map<String, Value>) -> Result<ObjectId, DataError> {
        let id = self.next_id();
        self.insert_with_id(route, id, fields)?;
        Ok(id)
    }

    /// Insert or replace a record under a caller-chosen identifier.
    pub fn insert_with_id(
        &self,
        route: &RouteId,
        id: ObjectId,
        fields: Map<String, Value>,
    ) -> Result<(), DataError> {
        let collection = self.collection_for(route).to_string();
        self.write_collection(&collection, |docs| {
            docs.insert(id, fields);
        })?;
        tracing::debug!(route = %route, id = %id, "Inserted record");
        Ok(())
    }

    /// Remove a record. Returns whether it existed.
    pub fn remove(&self, route: &RouteId, id: &ObjectId) -> Result<bool, DataError> {
        let collection = self.collection_for(route).to_string();
        self.write_collection(&collection, |docs| docs.remove(id).is_some())
    }

    /// Simulate the backing database going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn collection_for<'a>(&'a self, route: &'a RouteId) -> &'a str {
        self.bindings
            .get(route)
            .map(String::as_str)
            .unwrap_or_else(|| route.as_str())
    }

    fn next_id(&self) -> ObjectId {
        let timestamp = u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX);
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        ObjectId::from_parts(timestamp, self.process, counter)
    }

    fn check_available(&self) -> Result<(), DataError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DataError::Unavailable {
                reason: "data source offline".to_string(),
            })
        }
    }

    fn lock_poisoned() -> DataError {
        DataError::Unavailable {
            reason: "collection lock poisoned".to_string(),
        }
    }

    fn write_collection<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Collection) -> T,
    ) -> Result<T, DataError> {
        let mut collections = self.collections.write().map_err(|_| Self::lock_poisoned())?;
        Ok(f(collections.entry(collection.to_string()).or_default()))
    }

    fn read_collection<T>(
        &self,
        route: &RouteId,
        f: impl FnOnce(Option<&Collection>) -> T,
    ) -> Result<T, DataError> {
        self.check_available()?;
        let collections = self.collections.read().map_err(|_| Self::lock_poisoned())?;
        Ok(f(collections.get(self.collection_for(route))))
    }
}

#[async_trait]
impl DataSource for InMemoryDataSource {
    type Codec = ObjectIdCodec;

    async fn list_known_ids(&self, route: &RouteId) -> Result<Vec<ObjectId>, DataError> {
        self.read_collection(route, |docs| {
            docs.map(|docs| docs.keys().copied().collect())
                .unwrap_or_default()
        })
    }

    async fn fetch_by_id(&self, route: &RouteId, id: &ObjectId) -> Result<RawRecord, DataError> {
        self.read_collection(route, |docs| {
            docs.and_then(|docs| docs.get(id))
                .map(|fields| RawRecord::new(ObjectIdCodec::encode(id), fields.clone()))
        })?
        .ok_or_else(|| DataError::NotFound {
            route: route.clone(),
            id: ObjectIdCodec::encode(id),
        })
    }

    async fn list_records(&self, route: &RouteId) -> Result<Vec<RawRecord>, DataError> {
        self.read_collection(route, |docs| {
            docs.map(|docs| {
                docs.iter()
                    .map(|(id, fields)| RawRecord::new(ObjectIdCodec::encode(id), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
        })
    }
}
