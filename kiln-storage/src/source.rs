//! Data source collaborator.
//!
//! The engine never talks to a database directly. It is handed an owned
//! `DataSource` at startup and passes it by reference into every builder.

use async_trait::async_trait;
use kiln_core::{DataError, IdCodec, RouteId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Native identifier type of a data source.
pub type IdOf<S> = <<S as DataSource>::Codec as IdCodec>::Id;

/// A record as returned by the data source.
///
/// `id` is already in its canonical string form; `fields` holds everything
/// else the record carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl RawRecord {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Page props for this record: its fields plus the string `id`.
    ///
    /// A stored `id` field is overwritten so pages always see the canonical form.
    pub fn into_props(self) -> Value {
        let mut fields = self.fields;
        fields.insert("id".to_string(), Value::String(self.id));
        Value::Object(fields)
    }
}

/// Read access to the records pages are rendered from.
///
/// Implementations must tolerate concurrent calls for different keys.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// Codec between native identifiers and their string form.
    type Codec: IdCodec;

    /// Every identifier currently visible for `route`.
    async fn list_known_ids(&self, route: &RouteId) -> Result<Vec<IdOf<Self>>, DataError>;

    /// One record by identifier.
    async fn fetch_by_id(&self, route: &RouteId, id: &IdOf<Self>) -> Result<RawRecord, DataError>;

    /// Every record visible for `route`, for collection pages.
    async fn list_records(&self, route: &RouteId) -> Result<Vec<RawRecord>, DataError>;
}
