// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Response types for the API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where an emission record was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cache,
    Api,
}

/// Envelope returned by the electricity endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmissionResponse {
    pub source: Source,
    /// Provider response, replayed untouched.
    pub data: Value,
}

impl EmissionResponse {
    pub fn cached(data: Value) -> Self {
        Self {
            source: Source::Cache,
            data,
        }
    }

    pub fn fresh(data: Value) -> Self {
        Self {
            source: Source::Api,
            data,
        }
    }
}
