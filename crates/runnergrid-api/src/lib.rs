//! runnergrid-api — REST API for RunnerGrid.
//!
//! Provides axum route handlers for the operator surface: enabling and
//! disabling fleets, status, worker listings, and manual scaling.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/fleets` | List all fleet specs |
//! | POST | `/api/v1/fleets` | Enable a fleet |
//! | GET | `/api/v1/fleets/:id` | Get a fleet spec |
//! | DELETE | `/api/v1/fleets/:id?drain=true` | Disable a fleet |
//! | GET | `/api/v1/fleets/:id/status` | Fleet status snapshot |
//! | GET | `/api/v1/fleets/:id/workers` | List worker records |
//! | POST | `/api/v1/fleets/:id/scale` | Force a manual scale |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use runnergrid_fleet::FleetManager;
use runnergrid_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub manager: Arc<FleetManager>,
}

/// Build the complete API router.
pub fn build_router(store: StateStore, manager: Arc<FleetManager>) -> Router {
    let api_state = ApiState { store, manager };

    let api_routes = Router::new()
        .route("/fleets", get(handlers::list_fleets).post(handlers::enable_fleet))
        .route("/fleets/{id}", get(handlers::get_fleet).delete(handlers::disable_fleet))
        .route("/fleets/{id}/status", get(handlers::fleet_status))
        .route("/fleets/{id}/workers", get(handlers::list_workers))
        .route("/fleets/{id}/scale", post(handlers::scale_fleet))
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}
