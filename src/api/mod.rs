//! HTTP adapter: route configuration, request handlers and the shared
//! application state the handlers operate on.

pub mod handlers;
pub mod routes;

pub use routes::configure;

use std::sync::Arc;

use crate::db::Database;
use crate::engine::AllocationEngine;
use crate::forecast::CapacityAnalytics;
use crate::lifecycle::OccupancyManager;
use crate::predictor::AdmissionPredictor;
use crate::registry::BedRegistry;
use crate::waitlist::Waitlist;

/// Shared application state: the composition root builds one of these
/// and hands it to the HTTP server.
pub struct AppState {
    pub db: Arc<Database>,
    pub registry: Arc<BedRegistry>,
    pub waitlist: Arc<Waitlist>,
    pub engine: Arc<AllocationEngine>,
    pub occupancy: Arc<OccupancyManager>,
    pub analytics: Arc<CapacityAnalytics>,
    pub predictor: Arc<AdmissionPredictor>,
}

impl AppState {
    /// Wire every component onto one database.
    pub fn new(db: Arc<Database>) -> Self {
        let registry = Arc::new(BedRegistry::new(db.pool().clone()));
        let waitlist = Arc::new(Waitlist::new(db.pool().clone()));
        let engine = Arc::new(AllocationEngine::new(registry.clone(), waitlist.clone(), db.clone()));
        let occupancy = Arc::new(OccupancyManager::new(registry.clone(), db.pool().clone()));
        let analytics = Arc::new(CapacityAnalytics::new(db.clone()));
        let predictor = Arc::new(AdmissionPredictor::new());

        Self { db, registry, waitlist, engine, occupancy, analytics, predictor }
    }
}
