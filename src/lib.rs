use std::sync::Arc;

use config::Config;
use gateway::hub::ConnectionHub;
use geo::index::GeoIndex;
use presence::PresenceService;
use relay::EventBus;
use rooms::Reconciler;

pub mod config;
pub mod error;
pub mod gateway;
pub mod geo;
pub mod middleware;
pub mod presence;
pub mod relay;
pub mod rooms;
pub mod routes;
pub mod store;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub geo: Arc<GeoIndex>,
    pub presence: Arc<PresenceService>,
    pub reconciler: Arc<Reconciler>,
    pub hub: Arc<ConnectionHub>,
    pub bus: Arc<dyn EventBus>,
}
