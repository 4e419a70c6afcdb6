use crate::cli::ServeArgs;
use crate::infra::AppState;
use crate::routes::with_scoring_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use prospect_scoring::config::AppConfig;
use prospect_scoring::error::AppError;
use prospect_scoring::scoring::{OpenAiChatModel, ProspectScoringService};
use prospect_scoring::telemetry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    if config.admission.api_keys.is_empty() {
        warn!("SCORING_API_KEYS is empty; every scoring request will be rejected");
    }
    if config.upstream.api_key.is_empty() {
        warn!("OPENAI_API_KEY is not set; model calls will fail until it is configured");
    }

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        version: Arc::from(config.scoring.scorer_version.as_str()),
    };

    let model = Arc::new(OpenAiChatModel::new(&config.upstream)?);
    let scoring_service = Arc::new(ProspectScoringService::from_config(model, &config));

    let app = with_scoring_routes(scoring_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        model = %config.upstream.model,
        chunk_size = config.scoring.chunk_size,
        "prospect scoring service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
