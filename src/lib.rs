//! Crowdsourced tree-planting registry: a city-keyed JSON blob, the commands
//! that mutate it, and the map, ranking and management views rendered from it.

pub mod cities;
pub mod config;
pub mod error;
pub mod ids;
pub mod ops;
pub mod render;
pub mod schema;
pub mod server;
pub mod store;
pub mod types;
