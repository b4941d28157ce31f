//! Application Startup
//!
//! Wires repositories, the session manager, the hub and the optional
//! message bus into the router, and runs the server with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::application::services::{AuthService, AuthServiceImpl};
use crate::config::Settings;
use crate::domain::MessageRepository;
use crate::infrastructure::bus::{MessageBus, RedisStreamBus};
use crate::infrastructure::database;
use crate::infrastructure::repositories::{
    PgMessageRepository, PgRefreshTokenRepository, PgUserRepository,
};
use crate::presentation::http::{handlers::health, routes};
use crate::presentation::middleware::{cors, IpRateLimiter};
use crate::presentation::websocket::{Hub, HubConfig, HubHandle};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub auth: Arc<dyn AuthService>,
    pub messages: Arc<dyn MessageRepository>,
    pub hub: HubHandle,
    pub ip_limiter: Arc<IpRateLimiter>,
    /// Root token; connections run on child tokens of it
    pub shutdown: CancellationToken,
}

/// Build the router with tracing and CORS layers applied.
pub fn build_router(state: AppState) -> Router {
    let cors = cors::create_cors_layer(&state.settings.cors);
    routes::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    settings: Arc<Settings>,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        let settings = Arc::new(settings);
        health::init_server_start();

        let db = database::create_pool(&settings.database).await?;
        tracing::info!("Database connection pool created");

        if settings.database.run_migrations {
            database::run_migrations(&db).await?;
            tracing::info!("Database migrations applied");
        }

        let users = Arc::new(PgUserRepository::new(db.clone()));
        let tokens = Arc::new(PgRefreshTokenRepository::new(db.clone()));
        let messages: Arc<dyn MessageRepository> = Arc::new(PgMessageRepository::new(db));
        let auth: Arc<dyn AuthService> =
            Arc::new(AuthServiceImpl::new(users, tokens, settings.jwt.clone()));

        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();
        let instance_id = Uuid::new_v4();

        let (bus, bus_rx) = if settings.bus.enabled {
            let bus = RedisStreamBus::connect(
                &settings.redis,
                settings.bus.clone(),
                instance_id.to_string(),
            )
            .await?;
            let deliveries = bus.subscribe(shutdown.child_token()).await?;
            tracing::info!(stream = %settings.bus.stream, "Message bus subscribed");
            (Some(Arc::new(bus) as Arc<dyn MessageBus>), Some(deliveries))
        } else {
            tracing::info!("Message bus disabled, running single-instance");
            (None, None)
        };

        let (hub, hub_handle) = Hub::new(
            HubConfig {
                instance_id,
                subject: settings.bus.subject.clone(),
                inbound_capacity: settings.chat.inbound_capacity,
            },
            messages.clone(),
            bus,
            tasks.clone(),
        );
        tasks.spawn(hub.run(bus_rx, shutdown.clone()));

        let ip_limiter = Arc::new(IpRateLimiter::new(&settings.rate_limit));
        tasks.spawn(
            ip_limiter
                .clone()
                .run_sweeper(settings.rate_limit.sweep_interval(), shutdown.clone()),
        );

        let state = AppState {
            settings: settings.clone(),
            auth,
            messages,
            hub: hub_handle,
            ip_limiter,
            shutdown: shutdown.clone(),
        };
        let router = build_router(state);

        let addr = settings.server_addr();
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Listening on {}", addr);

        Ok(Self {
            listener,
            router,
            shutdown,
            tasks,
            settings,
        })
    }

    /// Run the server until a shutdown signal arrives, then drain.
    pub async fn run_until_stopped(self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        });

        let stopped = self.shutdown.clone();
        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { stopped.cancelled().await })
        .await?;

        self.tasks.close();
        let grace = self.settings.server.shutdown_grace();
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            tracing::warn!(
                pending = self.tasks.len(),
                "Background tasks still running after shutdown grace"
            );
        }

        tracing::info!("Server stopped");
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
