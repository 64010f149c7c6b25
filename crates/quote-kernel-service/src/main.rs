use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use clap::Parser;
use quote_kernel_api::{AddQuoteRequest, QuoteKernelApi, QuoteKernelConfig, API_CONTRACT_VERSION};
use quote_kernel_core::{CategoryFilter, Quote};
use quote_kernel_sync::{HttpRemote, SyncScheduler};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: QuoteKernelApi,
    push_on_add: bool,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct SelectCategoryRequest {
    category: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RandomQuery {
    category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct LastQuoteResponse {
    session: String,
    last_quote: Option<Quote>,
}

#[derive(Debug, Parser)]
#[command(name = "quote-kernel-service")]
#[command(about = "Local HTTP service for Quote Kernel")]
struct Args {
    #[arg(long)]
    db: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    #[arg(long)]
    remote_endpoint: Option<String>,
    #[arg(long)]
    sync_interval_secs: Option<u64>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_REQUEST;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(message: impl Into<String>) -> ServiceError {
        ServiceError { service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/quotes", get(quotes_list).post(quotes_add))
        .route("/v1/quotes/random", get(quotes_random))
        .route("/v1/quotes/last", get(quotes_last))
        .route("/v1/categories", get(categories_list))
        .route("/v1/categories/selected", put(categories_select))
        .route("/v1/export", get(export_quotes))
        .route("/v1/import", post(import_quotes))
        .route("/v1/sync", post(sync_now))
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = QuoteKernelConfig::load(args.config.as_deref())?;
    if let Some(db) = args.db {
        config.db = db;
    }
    if let Some(endpoint) = args.remote_endpoint {
        config.remote.endpoint = endpoint;
    }
    if let Some(secs) = args.sync_interval_secs {
        config.sync_interval_secs = secs;
    }

    let remote = Arc::new(HttpRemote::new(config.remote.clone()));
    let api = QuoteKernelApi::new(config.db.clone(), remote);
    let state = ServiceState { api: api.clone(), push_on_add: config.push_on_add };

    let scheduler = start_sync_schedule(api.clone(), SyncScheduler::new(config.sync_interval()));

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(
        bind = %args.bind,
        db = %config.db.display(),
        endpoint = %config.remote.endpoint,
        session = %api.session(),
        "quote kernel service listening"
    );
    axum::serve(listener, app(state)).with_graceful_shutdown(shutdown_signal()).await?;

    scheduler.abort();
    let cleared = api.end_session()?;
    tracing::info!(cleared, "service session ended");
    Ok(())
}

fn start_sync_schedule(
    api: QuoteKernelApi,
    scheduler: SyncScheduler,
) -> tokio::task::JoinHandle<()> {
    scheduler.spawn(move || {
        let api = api.clone();
        async move {
            match tokio::task::spawn_blocking(move || api.sync_once()).await {
                Ok(Ok(report)) => match report.error {
                    Some(error) => tracing::warn!(%error, "scheduled sync failed"),
                    None => tracing::debug!(appended = report.appended, "scheduled sync finished"),
                },
                Ok(Err(err)) => tracing::error!(error = %err, "scheduled sync could not update storage"),
                Err(err) => tracing::error!(error = %err, "scheduled sync task panicked"),
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<quote_kernel_store_sqlite::SchemaStatus>>, ServiceError> {
    let status = state.api.schema_status().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<quote_kernel_api::MigrateResult>>, ServiceError> {
    let result =
        state.api.migrate(request.dry_run).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(result)))
}

async fn quotes_list(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<quote_kernel_api::QuoteList>>, ServiceError> {
    let listed = state.api.list_quotes().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(listed)))
}

async fn quotes_add(
    State(state): State<ServiceState>,
    Json(request): Json<AddQuoteRequest>,
) -> Result<Json<ServiceEnvelope<quote_kernel_api::AddQuoteResult>>, ServiceError> {
    let added = state.api.add_quote(request).map_err(|err| ServiceState::error(err.to_string()))?;

    if state.push_on_add {
        let api = state.api.clone();
        let quote = added.quote.clone();
        tokio::task::spawn_blocking(move || {
            let outcome = api.push_quote(&quote);
            tracing::debug!(delivered = outcome.delivered, "background push finished");
        });
    }

    Ok(Json(envelope(added)))
}

async fn quotes_random(
    State(state): State<ServiceState>,
    Query(query): Query<RandomQuery>,
) -> Result<Json<ServiceEnvelope<quote_kernel_api::RandomQuote>>, ServiceError> {
    let filter = query.category.as_deref().map(CategoryFilter::parse);
    let picked = state.api.show_random(filter).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(picked)))
}

async fn quotes_last(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<LastQuoteResponse>>, ServiceError> {
    let last_quote = state.api.last_quote().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(LastQuoteResponse { session: state.api.session().to_string(), last_quote })))
}

async fn categories_list(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<quote_kernel_api::CategoryList>>, ServiceError> {
    let listed = state.api.categories().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(listed)))
}

async fn categories_select(
    State(state): State<ServiceState>,
    Json(request): Json<SelectCategoryRequest>,
) -> Result<Json<ServiceEnvelope<quote_kernel_api::CategoryList>>, ServiceError> {
    let listed = state
        .api
        .select_category(&request.category)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(listed)))
}

async fn export_quotes(State(state): State<ServiceState>) -> Result<Response, ServiceError> {
    let export = state.api.export_quotes().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"quotes.json\""),
        ],
        export.json,
    )
        .into_response())
}

async fn import_quotes(
    State(state): State<ServiceState>,
    body: String,
) -> Result<Json<ServiceEnvelope<quote_kernel_api::ImportResult>>, ServiceError> {
    let result = state.api.import_quotes(&body).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(result)))
}

async fn sync_now(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<quote_kernel_api::SyncReport>>, ServiceError> {
    let api = state.api.clone();
    let report = tokio::task::spawn_blocking(move || api.sync_once())
        .await
        .map_err(|err| ServiceState::error(format!("sync task failed: {err}")))?
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(report)))
}
