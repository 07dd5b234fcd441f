use crate::{
    api::{
        extractors::USER_HEADER,
        routes::{
            create_competition, create_team, decide_competition, get_competition,
            get_competition_teams, get_profile, get_team_receipts, get_winner_message, health,
            join_team, submit_receipt, update_profile,
        },
    },
    config::Settings,
    domain::League,
    infra::{
        create_folder,
        db::{DBConnection, DatabasePoolConfig, DatabaseType},
        FileImageStore, ImageStore, ReceiptReader, VisionClient,
    },
};

// Mock implementations only available with e2e-testing feature or debug builds
#[cfg(any(feature = "e2e-testing", debug_assertions))]
use crate::infra::ocr_mock::MockReceiptReader;
use anyhow::anyhow;
use axum::{
    body::Body,
    extract::{connect_info::IntoMakeServiceWithConnectInfo, ConnectInfo, DefaultBodyLimit, Request},
    http::{Extensions, HeaderName, HeaderValue},
    middleware::{self, AddExtension, Next},
    response::IntoResponse,
    routing::{get, post},
    serve::Serve,
    Router,
};
use hyper::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Method,
};
use log::{error, info, warn};
use reqwest_middleware::{
    reqwest::{self, Client},
    ClientBuilder, ClientWithMiddleware, Middleware,
};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::{collections::HashMap, net::SocketAddr, str::FromStr};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::{net::TcpListener, select, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Room for the multipart framing and text fields around the photo
const UPLOAD_OVERHEAD_BYTES: usize = 64 * 1024;

pub struct Application {
    server: Serve<
        TcpListener,
        IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
        AddExtension<Router, ConnectInfo<SocketAddr>>,
    >,
    cancellation_token: CancellationToken,
    background_tasks: TaskTracker,
}

impl Application {
    pub async fn build(config: Settings) -> Result<Self, anyhow::Error> {
        let address = format!(
            "{}:{}",
            config.api_settings.domain, config.api_settings.port
        );
        let listener = SocketAddr::from_str(&address)?;
        let (app_state, background_tasks, cancellation_token) = build_app(config.clone()).await?;
        let server = build_server(listener, app_state, config.api_settings.origins).await?;
        Ok(Self {
            server,
            cancellation_token,
            background_tasks,
        })
    }

    pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
        info!("Starting server...");
        match self.server.with_graceful_shutdown(shutdown_signal()).await {
            Ok(_) => {
                info!("Server shutdown initiated");
                self.cancellation_token.cancel();

                let timeout = tokio::time::sleep(std::time::Duration::from_secs(10));
                select! {
                    _ = self.background_tasks.wait() => {
                        info!("Background tasks completed gracefully");
                    }
                    _ = timeout => {
                        warn!("Background tasks timed out during shutdown");
                    }
                }

                info!("Shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("Server shutdown error: {}", e);
                self.cancellation_token.cancel();

                let _ = tokio::time::timeout(
                    std::time::Duration::from_secs(5),
                    self.background_tasks.wait(),
                )
                .await;

                Err(anyhow!("Error during server shutdown: {}", e))
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub league: League,
    pub max_upload_bytes: usize,
    pub max_image_bytes: usize,
    pub background_threads: Arc<HashMap<String, JoinHandle<()>>>,
}

fn build_receipt_reader(config: &Settings) -> Result<Arc<dyn ReceiptReader>, anyhow::Error> {
    #[cfg(any(feature = "e2e-testing", debug_assertions))]
    if config.ocr_settings.mock_enabled {
        info!("Mock receipt reader configured");
        return Ok(Arc::new(MockReceiptReader::new()));
    }

    #[cfg(not(any(feature = "e2e-testing", debug_assertions)))]
    if config.ocr_settings.mock_enabled {
        return Err(anyhow!(
            "Mock receipt reader requires e2e-testing feature or debug build"
        ));
    }

    let reader = VisionClient::new(build_reqwest_client(), &config.ocr_settings)?;
    info!(
        "Vision api configured at {} with model {}",
        config.ocr_settings.base_url, config.ocr_settings.model
    );
    Ok(Arc::new(reader))
}

pub async fn build_app(
    config: Settings,
) -> Result<(AppState, TaskTracker, CancellationToken), anyhow::Error> {
    let reader = build_receipt_reader(&config)?;

    create_folder(&config.league_settings.image_folder)?;
    let images: Arc<dyn ImageStore> =
        Arc::new(FileImageStore::new(&config.league_settings.image_folder));
    info!(
        "Receipt images stored under {}",
        config.league_settings.image_folder
    );

    create_folder(&config.db_settings.data_folder)?;

    let pool_config: DatabasePoolConfig = config.db_settings.clone().into();

    let league_db = DBConnection::new(
        &config.db_settings.data_folder,
        "league",
        pool_config.clone(),
        DatabaseType::League,
    )
    .await
    .map_err(|e| anyhow!("Error setting up league db: {}", e))?;

    let users_db = DBConnection::new(
        &config.db_settings.data_folder,
        "users",
        pool_config,
        DatabaseType::Users,
    )
    .await
    .map_err(|e| anyhow!("Error setting up users db: {}", e))?;

    let league = League::new(league_db, users_db, reader, images, &config);
    info!("League service configured");

    let tracker = TaskTracker::new();
    let mut threads = HashMap::new();
    let cancel_token = CancellationToken::new();

    let expiry_sweeper = league.expiry_sweeper();
    let sweeper_cancel = cancel_token.clone();
    let expiry_sweeper_task = tracker.spawn(async move {
        match expiry_sweeper.watch(sweeper_cancel).await {
            Ok(_) => {
                info!("Successfully shutdown expiry sweeper")
            }
            Err(e) => {
                error!("Error in expiry sweeper: {}", e)
            }
        }
    });

    tracker.close();
    threads.insert(String::from("expiry_sweeper"), expiry_sweeper_task);

    let app_state = AppState {
        league,
        max_upload_bytes: upload_limit(config.league_settings.max_image_bytes),
        max_image_bytes: config.league_settings.max_image_bytes,
        background_threads: Arc::new(threads),
    };
    Ok((app_state, tracker, cancel_token))
}

/// Request body limit for an image plus the rest of the multipart form
pub fn upload_limit(max_image_bytes: usize) -> usize {
    max_image_bytes + UPLOAD_OVERHEAD_BYTES
}

pub async fn build_server(
    socket_addr: SocketAddr,
    app_state: AppState,
    origins: Vec<String>,
) -> Result<
    Serve<
        TcpListener,
        IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
        AddExtension<Router, ConnectInfo<SocketAddr>>,
    >,
    anyhow::Error,
> {
    let listener = TcpListener::bind(socket_addr).await?;

    info!("Setting up service");
    let app = app(app_state, origins);
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    info!(
        "Service running @: http://{}:{}",
        socket_addr.ip(),
        socket_addr.port()
    );
    Ok(server)
}

pub fn app(app_state: AppState, origins: Vec<String>) -> Router {
    let origins: Vec<HeaderValue> = origins
        .into_iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(USER_HEADER),
        ])
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true);

    let competition_endpoints = Router::new()
        .route("/", post(create_competition))
        .route("/{competition_id}", get(get_competition))
        .route(
            "/{competition_id}/teams",
            get(get_competition_teams).post(create_team),
        )
        .route("/{competition_id}/decide", post(decide_competition))
        .route(
            "/{competition_id}/teams/{team_id}/winner_message",
            get(get_winner_message),
        );

    let team_endpoints = Router::new()
        .route("/{team_id}/join", post(join_team))
        .route(
            "/{team_id}/receipts",
            get(get_team_receipts)
                .post(submit_receipt)
                .layer(DefaultBodyLimit::max(app_state.max_upload_bytes)),
        );

    Router::new()
        .route("/api/v1/health_check", get(health))
        .nest("/api/v1/competitions", competition_endpoints)
        .nest("/api/v1/teams", team_endpoints)
        .route("/api/v1/profile", get(get_profile).put(update_profile))
        .layer(middleware::from_fn(log_request))
        .with_state(Arc::new(app_state))
        .layer(cors)
}

async fn log_request(request: Request<Body>, next: Next) -> impl IntoResponse {
    let now = time::OffsetDateTime::now_utc();
    let path = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or_default();
    info!(target: "http_request","new request, {} {}", request.method().as_str(), path);

    let response = next.run(request).await;
    let response_time = time::OffsetDateTime::now_utc() - now;
    info!(target: "http_response", "response, code: {}, time: {}", response.status().as_str(), response_time);

    response
}

pub fn build_reqwest_client() -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
    ClientBuilder::new(Client::new())
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .with(LoggingMiddleware)
        .build()
}

struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut Extensions,
        next: reqwest_middleware::Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        let method = req.method().clone();
        let url = req.url().clone();

        info!("Making {} request to: {}", method, url);

        let result = next.run(req, extensions).await;

        match &result {
            Ok(response) => {
                info!("{} {} -> Status: {}", method, url, response.status());
            }
            Err(error) => {
                warn!("{} {} -> Error: {:?}", method, url, error);
            }
        }

        result
    }
}

async fn shutdown_signal() {
    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to install shutdown signal handlers: {}", e);
            std::future::pending::<()>().await;
            return;
        }
    };

    select! {
        _ = sigint.recv() => info!("Received SIGINT signal"),
        _ = sigterm.recv() => info!("Received SIGTERM signal"),
    }
}
