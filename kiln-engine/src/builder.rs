//! Page builders: fetch, render, stamp.

use std::sync::Arc;

use kiln_core::{Artifact, BuildError, IdCodec, ParamSet, Route, Timestamp};
use kiln_storage::{DataSource, RawRecord};
use serde_json::{json, Value};

/// Turns page props into the payload bytes that get served.
pub trait Renderer: Send + Sync + 'static {
    fn render(&self, route: &Route, props: &Value) -> Result<Vec<u8>, BuildError>;

    /// Extension of the payload files written for this renderer's output.
    fn file_extension(&self) -> &str {
        "bin"
    }
}

/// Serves the props themselves as compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, _route: &Route, props: &Value) -> Result<Vec<u8>, BuildError> {
        serde_json::to_vec(props).map_err(|e| BuildError::Render {
            reason: e.to_string(),
        })
    }

    fn file_extension(&self) -> &str {
        "json"
    }
}

/// Builds one artifact per (route, params) from the data source.
pub struct PageBuilder<D: DataSource> {
    source: Arc<D>,
    renderer: Arc<dyn Renderer>,
}

impl<D: DataSource> Clone for PageBuilder<D> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            renderer: Arc::clone(&self.renderer),
        }
    }
}

impl<D: DataSource> PageBuilder<D> {
    pub fn new(source: Arc<D>, renderer: Arc<dyn Renderer>) -> Self {
        Self { source, renderer }
    }

    pub fn source(&self) -> &Arc<D> {
        &self.source
    }

    pub fn file_extension(&self) -> &str {
        self.renderer.file_extension()
    }

    /// Fetch the route's data, render it and stamp the artifact with `now`
    /// and the route's TTL.
    ///
    /// Collection routes render `{"records": [...]}` from every record;
    /// record routes render the record's fields plus its string `id`.
    pub async fn build(
        &self,
        route: &Route,
        params: &ParamSet,
        now: Timestamp,
    ) -> Result<Artifact, BuildError> {
        let key = route.key(params);
        let props = match route.key_slot() {
            None => {
                let records = self
                    .source
                    .list_records(&route.id)
                    .await
                    .map_err(|e| BuildError::from_data(e, &key))?;
                let records: Vec<Value> = records.into_iter().map(RawRecord::into_props).collect();
                json!({ "records": records })
            }
            Some(slot) => {
                // Parameters were canonicalized on the way in, so an
                // undecodable id cannot name an upstream record.
                let id = params
                    .get(slot)
                    .and_then(|raw| <D::Codec as IdCodec>::decode(raw).ok())
                    .ok_or_else(|| BuildError::NotFound { key: key.clone() })?;
                self.source
                    .fetch_by_id(&route.id, &id)
                    .await
                    .map_err(|e| BuildError::from_data(e, &key))?
                    .into_props()
            }
        };

        let payload = self.renderer.render(route, &props)?;
        tracing::trace!(key = %key, bytes = payload.len(), "Rendered page");
        Ok(Artifact::new(payload, props, now, route.ttl_seconds))
    }
}
