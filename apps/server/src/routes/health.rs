// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Info and health check endpoints.

use axum::Json;
use serde::Serialize;

/// Fixed message served at the root path.
pub const INFO_MESSAGE: &str = "Climatiq Carbon Emission API with Redis Cache";

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
}

/// API information response.
#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub message: &'static str,
}

/// GET /health - Health check endpoint.
pub async fn check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        service: "emission-cache-server",
    })
}

/// GET / - API information endpoint.
pub async fn info() -> Json<InfoResponse> {
    Json(InfoResponse {
        message: INFO_MESSAGE,
    })
}
