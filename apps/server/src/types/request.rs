// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request types for the API.

use crate::error::ApiError;
use crate::services::cache::emission_key;

/// A validated electricity lookup taken from the request path.
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionLookup {
    /// Region identifier, passed through to the provider untouched.
    pub region: String,
    /// Parsed energy quantity in kWh.
    pub energy: f64,
    /// Energy exactly as it appeared in the path.
    energy_text: String,
}

impl EmissionLookup {
    /// Validate path parameters. `energy` must be a finite number `>= 0`
    /// with no surrounding whitespace, since it is used verbatim in the key.
    pub fn parse(region: String, energy: String) -> Result<Self, ApiError> {
        let value: f64 = energy
            .parse()
            .map_err(|_| ApiError::InvalidEnergy(energy.clone()))?;

        if !value.is_finite() || value < 0.0 {
            return Err(ApiError::InvalidEnergy(energy));
        }

        Ok(Self {
            region,
            energy: value,
            energy_text: energy,
        })
    }

    /// Cache key built from the literal path text.
    pub fn cache_key(&self) -> String {
        emission_key(&self.region, &self.energy_text)
    }
}
