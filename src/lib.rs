pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod estimate;
pub mod ledger;
pub mod meter;
pub mod net;
pub mod store;
pub mod upstream;

use std::sync::Arc;

use crate::config::Config;
use crate::meter::Meter;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub meter: Arc<Meter>,
}
