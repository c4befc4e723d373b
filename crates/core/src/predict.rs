use crate::domain::features::FeatureRow;
use crate::domain::prediction::{PredictionRequest, PredictionResult};
use crate::history::SalesHistory;
use crate::model::ForecastModel;
use std::fmt;
use std::sync::Arc;

pub const NOT_FOUND_DETAIL: &str = "insufficient historical data to build features";

#[derive(Debug)]
pub enum PredictError {
    InvalidRequest(String),
    NotFound,
    SchemaMismatch { missing: Vec<String> },
    Internal(anyhow::Error),
}

impl fmt::Display for PredictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictError::InvalidRequest(detail) => write!(f, "invalid request: {detail}"),
            PredictError::NotFound => f.write_str(NOT_FOUND_DETAIL),
            PredictError::SchemaMismatch { missing } => {
                write!(f, "missing columns required by model: [{}]", missing.join(", "))
            }
            PredictError::Internal(err) => write!(f, "{err:#}"),
        }
    }
}

impl std::error::Error for PredictError {}

impl From<anyhow::Error> for PredictError {
    fn from(err: anyhow::Error) -> Self {
        PredictError::Internal(err)
    }
}

/// The fetch → normalize → align → score pipeline for one request at a time.
///
/// Cheap to clone; the model and history handle are shared.
#[derive(Clone)]
pub struct Predictor {
    model: Arc<ForecastModel>,
    history: Arc<dyn SalesHistory>,
}

impl Predictor {
    pub fn new(model: Arc<ForecastModel>, history: Arc<dyn SalesHistory>) -> Self {
        Self { model, history }
    }

    pub async fn predict(&self, request: &PredictionRequest) -> Result<PredictionResult, PredictError> {
        let key = request
            .sales_key()
            .map_err(|e| PredictError::InvalidRequest(e.to_string()))?;

        let mut rows = self.history.feature_rows(&key).await?;
        let raw = match rows.len() {
            0 => {
                tracing::info!(
                    date = %key.date,
                    store_id = %key.store_id,
                    item_id = %key.item_id,
                    backend = self.history.backend_name(),
                    "no historical row for prediction key"
                );
                return Err(PredictError::NotFound);
            }
            1 => rows.remove(0),
            n => {
                return Err(PredictError::Internal(anyhow::anyhow!(
                    "ambiguous history: {n} rows for item_id={} store_id={} date={}",
                    key.item_id,
                    key.store_id,
                    key.date
                )));
            }
        };

        let row = FeatureRow::normalize(&raw);
        let features = self
            .model
            .feature_vector(&row)
            .map_err(|missing| PredictError::SchemaMismatch { missing })?;
        let prediction = self.model.predict_one(features)?;

        tracing::debug!(
            date = %key.date,
            store_id = %key.store_id,
            item_id = %key.item_id,
            prediction,
            "prediction scored"
        );

        Ok(PredictionResult::success(request, prediction))
    }
}
