pub mod config;
pub mod error;
pub mod geo;
pub mod map;
pub mod models;
pub mod observability;
pub mod push;
pub mod session;
pub mod snapshot;
pub mod tracking;
