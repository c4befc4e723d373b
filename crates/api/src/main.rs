use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use m5_core::domain::prediction::{PredictionRequest, PredictionResult};
use m5_core::history::PgSalesHistory;
use m5_core::model::ForecastModel;
use m5_core::predict::{PredictError, Predictor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = m5_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    // Without a usable model there is nothing to serve.
    let model = match ForecastModel::load(&settings.model_path) {
        Ok(model) => Arc::new(model),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %format!("{e:#}"), "model load failed; refusing to start");
            return Err(e);
        }
    };

    let history = PgSalesHistory::connect_lazy(
        settings.require_database_url()?,
        settings.db_max_connections,
    )?;

    let state = AppState {
        predictor: Predictor::new(model, Arc::new(history)),
        service_name: settings.service_name.clone(),
    };

    let app = router(state).layer(cors_layer(&settings.cors_allowed_origins)?);

    let host: std::net::IpAddr = std::env::var("HOST")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(std::net::IpAddr::from([127, 0, 0, 1]));
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let addr = std::net::SocketAddr::from((host, port));

    tracing::info!(%addr, service = %settings.service_name, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[derive(Clone)]
struct AppState {
    predictor: Predictor,
    service_name: String,
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/predict", post(predict))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    // A lone "*" allows any origin; echoing it back keeps credentialed requests valid.
    let allow_origin = if origins.len() == 1 && origins[0] == "*" {
        AllowOrigin::mirror_request()
    } else {
        let origins = origins
            .iter()
            .map(|o| {
                if o == "*" {
                    anyhow::bail!("CORS origin \"*\" cannot be combined with other origins");
                }
                HeaderValue::from_str(o)
                    .map_err(|e| anyhow::anyhow!("invalid CORS origin {o:?}: {e}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request()))
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    project: String,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "online",
        project: state.service_name,
    })
}

async fn predict(
    State(state): State<AppState>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<PredictionResult>, ApiError> {
    let result = state.predictor.predict(&request).await.map_err(ApiError)?;
    Ok(Json(result))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Debug)]
struct ApiError(PredictError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            PredictError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            PredictError::NotFound => StatusCode::NOT_FOUND,
            PredictError::SchemaMismatch { .. } | PredictError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self.0 {
            PredictError::Internal(e) => {
                sentry_anyhow::capture_anyhow(e);
                tracing::error!(error = %self.0, "prediction failed");
            }
            PredictError::SchemaMismatch { missing } => {
                tracing::error!(?missing, "feature row does not match the model schema");
            }
            _ => {}
        }
        let body = ErrorBody {
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &m5_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
