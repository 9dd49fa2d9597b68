// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Electricity emission lookup, served cache-aside.

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use crate::error::ApiError;
use crate::types::{EmissionLookup, EmissionResponse};
use crate::AppState;

/// GET /emission/electricity/:region/:energy - Cached emission estimate.
///
/// Cache failures never fail the request: reads fall through to the provider
/// and writes are skipped. Provider failures are returned as 502 and are not
/// cached.
pub async fn get_electricity(
    State(state): State<AppState>,
    Path((region, energy)): Path<(String, String)>,
) -> Result<Json<EmissionResponse>, ApiError> {
    let lookup = EmissionLookup::parse(region, energy)?;
    let key = lookup.cache_key();

    match state.cache.get(&key).await {
        Ok(Some(raw)) => match serde_json::from_str::<Value>(&raw) {
            Ok(data) => {
                tracing::info!(key = %key, "Cache HIT");
                return Ok(Json(EmissionResponse::cached(data)));
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding unreadable cache entry");
            }
        },
        Ok(None) => tracing::debug!(key = %key, "Cache MISS"),
        Err(e) => {
            tracing::warn!(
                key = %key,
                backend = state.cache.backend(),
                error = %e,
                "Cache read failed, falling back to upstream"
            );
        }
    }

    let data = state.origin.estimate(&lookup.region, lookup.energy).await?;

    let raw = serde_json::to_string(&data)?;
    match state
        .cache
        .set_with_ttl(&key, &raw, state.config.cache_ttl())
        .await
    {
        Ok(()) => tracing::debug!(key = %key, size = raw.len(), "Cached result"),
        Err(e) => {
            tracing::warn!(
                key = %key,
                backend = state.cache.backend(),
                error = %e,
                "Cache write failed"
            );
        }
    }

    Ok(Json(EmissionResponse::fresh(data)))
}
