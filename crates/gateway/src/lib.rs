//! The gateway: device-aware connection management, the WebSocket message
//! router, REST embed endpoints, and the narrow internal API.

pub mod connections;
pub mod error;
pub mod fanout;
pub mod handlers;
pub mod router;
pub mod routes_embeds;
pub mod routes_internal;
pub mod routes_skills;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    connections::ConnectionManager,
    error::{GatewayError, Result},
    server::build_app,
    state::GatewayState,
};
