//! Build-time enumeration of a route's parameter sets.

use std::collections::BTreeSet;
use std::sync::Arc;

use kiln_core::{EnumerationError, IdCodec, ParamSet, Route};
use kiln_storage::DataSource;

/// Lists the parameter sets a route must be pre-built for.
pub struct ParamEnumerator<D: DataSource> {
    source: Arc<D>,
}

impl<D: DataSource> Clone for ParamEnumerator<D> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<D: DataSource> ParamEnumerator<D> {
    pub fn new(source: Arc<D>) -> Self {
        Self { source }
    }

    /// Every parameter set of `route`, deduplicated and sorted.
    ///
    /// A collection route yields the single empty set without asking the
    /// data source. A record route yields one set per known identifier, in
    /// canonical encoding. Either the whole list or an error: a failing
    /// source never produces a partial enumeration.
    pub async fn enumerate(&self, route: &Route) -> Result<Vec<ParamSet>, EnumerationError> {
        let Some(slot) = route.key_slot() else {
            return Ok(vec![ParamSet::empty()]);
        };

        let ids = self
            .source
            .list_known_ids(&route.id)
            .await
            .map_err(|e| EnumerationError {
                route: route.id.clone(),
                reason: e.to_string(),
            })?;

        let encoded: BTreeSet<String> = ids.iter().map(<D::Codec as IdCodec>::encode).collect();
        tracing::debug!(
            route = %route.id,
            listed = ids.len(),
            unique = encoded.len(),
            "Enumerated route"
        );

        Ok(encoded
            .into_iter()
            .map(|id| ParamSet::single(slot, id))
            .collect())
    }
}
