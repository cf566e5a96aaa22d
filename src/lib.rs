// Copyright 2025 Memophor Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Caching REST proxy in front of the Farmanet pharmacy locator.

pub mod adapter;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod geo;
pub mod legacy;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod state;
pub mod upstream;
pub mod validate;

pub use api::{router, AppState};
pub use config::AppConfig;
