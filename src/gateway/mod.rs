//! API gateway: the trust boundary and request router.
//!
//! Assembles the authentication middleware, the reverse proxy, the health
//! endpoint, and the HTTP server with graceful shutdown.

pub mod auth;
pub mod identity;
pub mod proxy;

pub use identity::{IdentityProvider, OidcVerifier};

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::http::Method;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::routing::get;
use axum::{Json, Router, middleware};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cache::CacheStore;
use crate::client::{MeshApi, ServiceClient};
use crate::config::{Config, Route};
use crate::realtime::{ChatHub, socket};
use crate::token::TokenCodec;
use crate::{Error, Result};

/// Shared state for the gateway's middleware and proxy.
pub struct GatewayState {
    /// External identity-provider verifier
    pub identity: Arc<dyn IdentityProvider>,
    /// Internal token codec
    pub codec: TokenCodec,
    /// Mesh client (user lookups during auth)
    pub mesh: MeshApi,
    /// Shared key attached to downstream requests
    pub internal_api_key: String,
    /// Static proxy route table
    pub routes: Vec<Route>,
}

/// The gateway server.
pub struct Gateway {
    config: Config,
    state: Arc<GatewayState>,
    hub: Option<Arc<ChatHub>>,
}

impl Gateway {
    /// Wire up the gateway from configuration plus its two injected
    /// collaborators: the identity provider and the cache backend.
    pub fn new(
        config: Config,
        identity: Arc<dyn IdentityProvider>,
        cache: Arc<dyn CacheStore>,
    ) -> Result<Self> {
        let codec = TokenCodec::with_ttl(&config.trust.internal_jwt_secret, config.trust.token_ttl)?;
        let client = Arc::new(ServiceClient::new(
            config.failsafe.clone(),
            &config.cache,
            cache,
            config.trust.internal_api_key.clone(),
        ));
        let mesh = MeshApi::new(client, config.services.clone());
        let state = Arc::new(GatewayState {
            identity,
            codec,
            mesh,
            internal_api_key: config.trust.internal_api_key.clone(),
            routes: config.services.routes(),
        });
        Ok(Self {
            config,
            state,
            hub: None,
        })
    }

    /// Attach the realtime hub; its socket is served at `/ws`.
    #[must_use]
    pub fn with_realtime(mut self, hub: Arc<ChatHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Mesh client shared with the rest of the process.
    #[must_use]
    pub fn mesh(&self) -> &MeshApi {
        &self.state.mesh
    }

    /// Build the axum router: `/health` is public, everything else is
    /// authenticated and proxied.
    #[must_use]
    pub fn router(&self) -> Router {
        let api = Router::new()
            .fallback(proxy::proxy_handler)
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth::auth_middleware,
            ))
            .with_state(self.state.clone());

        let mut app = Router::new().route("/health", get(health));
        if let Some(hub) = &self.hub {
            // The socket authenticates in-band via user:online, not through
            // the HTTP auth middleware
            app = app.merge(socket::router(Arc::clone(hub)));
        }
        app.merge(api)
            .layer(self.cors_layer())
            .layer(TraceLayer::new_for_http())
    }

    fn cors_layer(&self) -> CorsLayer {
        let origin = self
            .config
            .server
            .frontend_origin
            .parse::<HeaderValue>()
            .unwrap_or_else(|_| HeaderValue::from_static("http://localhost:3000"));
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
            ])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE])
            .allow_credentials(true)
    }

    /// Run the server until shutdown.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );
        let app = self.router();
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %addr, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        info!("Gateway shut down");
        Ok(())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "api-gateway" }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
