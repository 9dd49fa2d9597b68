// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Service modules for the cache store and the emission-factor provider.

pub mod cache;
pub mod origin;

pub use cache::{CacheStore, MemoryCache, RedisCache};
pub use origin::{ClimatiqClient, OriginClient, OriginError};
