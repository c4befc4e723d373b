use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const STATUS_SUCCESS: &str = "success";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub date: String,
    pub store_id: String,
    pub item_id: String,
}

/// Lookup key into the sales history: one (item, store) pair on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesKey {
    pub date: NaiveDate,
    pub store_id: String,
    pub item_id: String,
}

impl PredictionRequest {
    pub fn sales_key(&self) -> anyhow::Result<SalesKey> {
        let date = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d").map_err(|e| {
            anyhow::anyhow!("date must be a YYYY-MM-DD calendar date (got {:?}): {e}", self.date)
        })?;
        Ok(SalesKey {
            date,
            store_id: self.store_id.clone(),
            item_id: self.item_id.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionResult {
    pub item_id: String,
    pub date: String,
    pub prediction: f64,
    pub status: String,
}

impl PredictionResult {
    pub fn success(request: &PredictionRequest, prediction: f64) -> Self {
        Self {
            item_id: request.item_id.clone(),
            date: request.date.clone(),
            prediction,
            status: STATUS_SUCCESS.to_string(),
        }
    }
}
