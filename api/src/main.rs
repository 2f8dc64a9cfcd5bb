use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use waitwith_core::clock::{Clock, SystemClock};
use waitwith_core::engine::ResolutionEngine;
use waitwith_core::planner::{HeuristicPlanner, QueryPlanner};
use waitwith_core::store::{CountdownStore, MemoryStore};

mod config;
mod error;
mod extract;
mod llm;
mod middleware;
mod refresh;
mod routes;
mod state;
mod store;
mod tmdb;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "WAITWITH API",
        version = "0.1.0",
        description = "Shared release-date countdowns. Chat turns stream as Server-Sent Events; records are readable as JSON."
    ),
    paths(
        routes::health::health_check,
        routes::chat::chat,
        routes::chat::confirm,
        routes::countdowns::list_countdowns,
        routes::countdowns::get_countdown,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::chat::ChatRequest,
        routes::chat::ConfirmRequest,
        waitwith_core::error::ApiError,
        waitwith_core::countdown::ContentType,
        waitwith_core::countdown::CountdownRecord,
        waitwith_core::countdown::CountdownDraft,
        waitwith_core::session::PendingConfirmation,
        waitwith_core::session::ConfirmationEdits,
        waitwith_core::session::ReasonCode,
        waitwith_core::tool::ToolKind,
        waitwith_core::tool::TitleLookupResponse,
        waitwith_core::turn::ConfirmAction,
    ))
)]
struct ApiDoc;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waitwith_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    if let Err(e) = run(config::Settings::from_env()).await {
        tracing::error!(error = %e, "WAITWITH API stopped");
        std::process::exit(1);
    }
}

async fn connect_store(
    database_url: Option<&str>,
) -> Result<(Arc<dyn CountdownStore>, &'static str), BoxError> {
    let Some(database_url) = database_url else {
        tracing::warn!("DATABASE_URL not set, countdowns are kept in memory only");
        let store: Arc<dyn CountdownStore> = Arc::new(MemoryStore::new());
        return Ok((store, "memory"));
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await?;

    sqlx::migrate!("../migrations").run(&pool).await?;

    let store: Arc<dyn CountdownStore> = Arc::new(store::PgCountdownStore::new(pool));
    Ok((store, "postgres"))
}

async fn run(settings: config::Settings) -> Result<(), BoxError> {
    let (countdowns, store_kind) = connect_store(settings.database_url.as_deref()).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(settings.timezone));

    if settings.tmdb.api_key.is_none() {
        tracing::warn!("TMDB_API_KEY not set, every lookup will fail as transient");
    }
    let resolver = tmdb::TmdbClient::new(settings.tmdb.clone(), clock.clone())?;

    let planner: Arc<dyn QueryPlanner> = match settings.openai.clone() {
        Some(openai) => {
            tracing::info!(model = %openai.model, "using OpenAI-compatible planner");
            Arc::new(llm::OpenAiPlanner::new(openai)?)
        }
        None => {
            tracing::info!("OPENAI_API_KEY not set, using heuristic planner");
            Arc::new(HeuristicPlanner)
        }
    };

    let engine = ResolutionEngine::new(countdowns.clone(), Arc::new(resolver), planner, clock.clone())
        .with_tool_timeout(settings.tool_timeout);
    let app_state = state::AppState::new(engine, store_kind);

    if let Some(interval) = settings.refresh_interval {
        refresh::spawn_label_refresher(countdowns, clock, interval);
    }

    // CORS
    let cors_layer = middleware::cors::build_cors_layer();

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::chat::router().layer(middleware::rate_limit::chat_layer()))
        .merge(routes::countdowns::router().layer(middleware::rate_limit::read_layer()))
        .layer(axum::middleware::from_fn(middleware::security_headers::apply))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    tracing::info!(store = store_kind, timezone = %settings.timezone, "WAITWITH API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
