//! Quorum Gateway Library
//!
//! Trust boundary and routing core for the Quorum platform: a single API
//! gateway in front of the internal service mesh.
//!
//! # Features
//!
//! - **Gateway Auth**: external identity tokens verified at the edge and
//!   exchanged for short-lived internal tokens
//! - **Reverse Proxy**: prefix routing to the user, team, project, chat and
//!   notification services
//! - **Failsafes**: circuit breakers, retries, timeouts per service
//! - **Mesh Client**: cached service-to-service calls with shared-key auth
//! - **Realtime**: presence, rooms and chat fan-out over WebSocket, with a
//!   Redis backplane for multi-instance deployments
//! - **Production Ready**: health checks, structured logging, graceful
//!   shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod failsafe;
pub mod gateway;
pub mod principal;
pub mod realtime;
pub mod token;
pub mod trust;

pub use error::{Error, Result};
pub use principal::{ExternalIdentity, Principal};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
