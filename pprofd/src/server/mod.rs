//! Debug HTTP server
//!
//! An axum router separate from any application server:
//!
//! | Path        | Handler                              |
//! |-------------|--------------------------------------|
//! | `/`         | index page                           |
//! | `/profile`  | CPU profile (text or binary)         |
//! | `/trace`    | execution trace                      |
//! | `/symbol`   | program counter → function name      |
//! | `/cmdline`  | NUL-joined argv                      |
//! | `/<name>`   | named profile, 404 if unknown        |
//!
//! Configured through [`DebugServer::builder`]. [`DebugServer::run`] spawns
//! the listener and hands failures to the error handler; [`DebugServer::serve`]
//! returns them instead.

pub mod handlers;
pub mod index;

use axum::routing::any;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::domain::ServerError;
use crate::pipeline::SymbolResolver;
use crate::profiles::{NamedProfile, ProfileRegistry};
use crate::sampler::SamplerGateway;
use crate::symbolization::{LiveSymbolTable, SymbolLookup};

pub use index::{render_index, DEFAULT_INDEX_TEMPLATE, PROFILES_PLACEHOLDER};

/// Listen address used when none is configured
pub const DEFAULT_ADDR: &str = "127.0.0.1:6060";

/// Wraps the router, e.g. to add authentication or request logging
pub type Middleware = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// Receives listener failures from [`DebugServer::run`]
pub type ErrorHandler = Arc<dyn Fn(ServerError) + Send + Sync>;

/// PEM certificate and private key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub sampler: SamplerGateway,
    pub symbols: Arc<dyn SymbolLookup>,
    pub profiles: ProfileRegistry,
    /// Overrides the self-referential `/symbol` call when set
    pub resolver: Option<Arc<dyn SymbolResolver>>,
    pub index_template: Arc<str>,
    pub scheme: &'static str,
    pub addr: String,
}

#[derive(Default)]
pub struct DebugServerBuilder {
    addr: Option<String>,
    tls: Option<TlsConfig>,
    middleware: Option<Middleware>,
    index_template: Option<String>,
    error_handler: Option<ErrorHandler>,
    sampler: Option<SamplerGateway>,
    symbols: Option<Arc<dyn SymbolLookup>>,
    resolver: Option<Arc<dyn SymbolResolver>>,
    profiles: Option<ProfileRegistry>,
}

impl DebugServerBuilder {
    /// Listen address (`ip:port` or `host:port`)
    #[must_use]
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    /// Serve over TLS with a PEM key pair
    #[must_use]
    pub fn tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsConfig { cert: cert.into(), key: key.into() });
        self
    }

    #[must_use]
    pub fn middleware<F>(mut self, middleware: F) -> Self
    where
        F: Fn(Router) -> Router + Send + Sync + 'static,
    {
        self.middleware = Some(Arc::new(middleware));
        self
    }

    /// Index page HTML; `{{profiles}}` is replaced with the profile table
    #[must_use]
    pub fn index_template(mut self, template: impl Into<String>) -> Self {
        self.index_template = Some(template.into());
        self
    }

    #[must_use]
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ServerError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn sampler(mut self, sampler: SamplerGateway) -> Self {
        self.sampler = Some(sampler);
        self
    }

    #[must_use]
    pub fn symbol_table(mut self, symbols: Arc<dyn SymbolLookup>) -> Self {
        self.symbols = Some(symbols);
        self
    }

    #[must_use]
    pub fn symbol_resolver(mut self, resolver: Arc<dyn SymbolResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Register an additional named profile
    #[must_use]
    pub fn profile(mut self, profile: Arc<dyn NamedProfile>) -> Self {
        self.profiles.get_or_insert_with(ProfileRegistry::with_defaults).register(profile);
        self
    }

    /// Replace the whole profile registry
    #[must_use]
    pub fn profiles(mut self, profiles: ProfileRegistry) -> Self {
        self.profiles = Some(profiles);
        self
    }

    /// Finish configuration
    ///
    /// Loads the live symbol table unless one was supplied; a binary without
    /// readable symbols gets an empty table.
    #[must_use]
    pub fn build(self) -> DebugServer {
        let addr = self.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let symbols: Arc<dyn SymbolLookup> = match self.symbols {
            Some(symbols) => symbols,
            None => Arc::new(LiveSymbolTable::load_current().unwrap_or_else(|e| {
                warn!("Failed to load symbol table: {e:#}. /symbol will report num_symbols: 0");
                LiveSymbolTable::empty()
            })),
        };
        let error_handler: ErrorHandler = match self.error_handler {
            Some(handler) => handler,
            None => Arc::new(|e: ServerError| debug!("Debug server stopped: {e}")),
        };

        let state = AppState {
            sampler: self.sampler.unwrap_or_default(),
            symbols,
            profiles: self.profiles.unwrap_or_else(ProfileRegistry::with_defaults),
            resolver: self.resolver,
            index_template: Arc::from(
                self.index_template.as_deref().unwrap_or(DEFAULT_INDEX_TEMPLATE),
            ),
            scheme: if self.tls.is_some() { "https" } else { "http" },
            addr: addr.clone(),
        };

        DebugServer {
            addr,
            tls: self.tls,
            middleware: self.middleware,
            error_handler,
            state,
        }
    }
}

/// Embedded profiling server
pub struct DebugServer {
    addr: String,
    tls: Option<TlsConfig>,
    middleware: Option<Middleware>,
    error_handler: ErrorHandler,
    state: AppState,
}

impl DebugServer {
    #[must_use]
    pub fn builder() -> DebugServerBuilder {
        DebugServerBuilder::default()
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The router with middleware applied
    #[must_use]
    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/", any(handlers::index))
            .route("/profile", any(handlers::profile))
            .route("/trace", any(handlers::trace))
            .route("/symbol", any(handlers::symbol))
            .route("/cmdline", any(handlers::cmdline))
            .fallback(handlers::named_profile)
            .with_state(self.state.clone());

        match &self.middleware {
            Some(middleware) => middleware(router),
            None => router,
        }
    }

    /// Bind and serve until the listener fails
    ///
    /// # Errors
    /// Returns [`ServerError`] if the address cannot be resolved, the TLS
    /// key pair cannot be loaded, or the listener fails
    pub async fn serve(self) -> Result<(), ServerError> {
        let router = self.router();
        let socket_addr = resolve_addr(&self.addr).await?;
        let listener_error =
            |error: std::io::Error| ServerError::Listener { addr: self.addr.clone(), error };

        match &self.tls {
            Some(tls) => {
                let config = RustlsConfig::from_pem_file(&tls.cert, &tls.key).await.map_err(
                    |error| ServerError::Tls {
                        cert: tls.cert.display().to_string(),
                        key: tls.key.display().to_string(),
                        error,
                    },
                )?;

                info!("Debug server listening on https://{socket_addr}");
                axum_server::bind_rustls(socket_addr, config)
                    .serve(router.into_make_service())
                    .await
                    .map_err(listener_error)
            }
            None => {
                let listener = TcpListener::bind(socket_addr).await.map_err(listener_error)?;
                let local = listener.local_addr().map_err(listener_error)?;

                info!("Debug server listening on http://{local}");
                axum::serve(listener, router).await.map_err(listener_error)
            }
        }
    }

    /// Serve in the background, routing any failure to the error handler
    pub fn run(self) -> JoinHandle<()> {
        let error_handler = Arc::clone(&self.error_handler);
        tokio::spawn(async move {
            if let Err(e) = self.serve().await {
                error_handler(e);
            }
        })
    }
}

async fn resolve_addr(addr: &str) -> Result<SocketAddr, ServerError> {
    tokio::net::lookup_host(addr)
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ServerError::InvalidAddress(addr.to_string()))
}
