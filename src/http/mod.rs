//! HTTP control surface for the recorder
//!
//! - GET /health - Health check
//! - POST /recording/start - Run one recording in the background
//! - POST /recording/stop - Stop the current recording early
//! - GET /recording/status - Current snapshot
//! - GET /recording/events - Snapshot stream (server-sent events)
//! - GET /blobs/:id - Download the transcoded video

mod handlers;
mod routes;
mod state;

pub use handlers::StatusResponse;
pub use routes::create_router;
pub use state::AppState;
