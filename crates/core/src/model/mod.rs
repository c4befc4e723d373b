mod booster;
mod tree;

pub use booster::{Booster, Objective};

use crate::domain::features::{is_categorical, FeatureRow, FeatureValue, NUMERIC_FEATURES};
use anyhow::{bail, ensure, Context};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// How a categorical label becomes the numeric code the trees split on.
#[derive(Debug, Clone)]
enum CategoryCodes {
    /// Codes are positions in the category list stored with the model.
    Lookup(HashMap<String, f64>),
    /// No category lists were stored; labels are already integer codes.
    Integer,
}

impl CategoryCodes {
    fn from_categories(categories: &[Value]) -> Self {
        let codes = categories
            .iter()
            .enumerate()
            .filter_map(|(code, v)| category_label(v).map(|label| (label, code as f64)))
            .collect();
        CategoryCodes::Lookup(codes)
    }

    fn encode(&self, label: Option<&str>) -> f64 {
        let Some(label) = label else {
            return f64::NAN;
        };
        match self {
            CategoryCodes::Lookup(codes) => codes.get(label).copied().unwrap_or(f64::NAN),
            CategoryCodes::Integer => label
                .trim()
                .parse::<i64>()
                .map(|c| c as f64)
                .unwrap_or(f64::NAN),
        }
    }
}

fn category_label(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(i.to_string()),
            None => n.as_f64().map(|f| {
                if f.fract() == 0.0 {
                    format!("{}", f as i64)
                } else {
                    f.to_string()
                }
            }),
        },
        other => Some(other.to_string()),
    }
}

/// The trained booster plus the label encoding for its categorical features.
///
/// Loaded once at startup and shared read-only between requests.
#[derive(Debug, Clone)]
pub struct ForecastModel {
    booster: Booster,
    categories: Vec<Option<CategoryCodes>>,
}

impl ForecastModel {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "loading forecast model");

        let booster = Booster::load(path)?;
        let model = Self::from_booster(booster)
            .with_context(|| format!("model {} is not usable for serving", path.display()))?;

        tracing::info!(
            path = %path.display(),
            features = model.feature_order().len(),
            trees = model.booster.num_trees(),
            objective = ?model.booster.objective(),
            "forecast model loaded"
        );
        Ok(model)
    }

    pub fn from_model_str(text: &str) -> anyhow::Result<Self> {
        Self::from_booster(Booster::from_model_str(text)?)
    }

    pub fn from_booster(booster: Booster) -> anyhow::Result<Self> {
        let categorical: Vec<usize> = booster
            .feature_names()
            .iter()
            .enumerate()
            .filter(|(_, name)| is_categorical(name))
            .map(|(idx, _)| idx)
            .collect();

        let unknown: Vec<&str> = booster
            .feature_names()
            .iter()
            .map(String::as_str)
            .filter(|name| !is_categorical(name) && !NUMERIC_FEATURES.contains(name))
            .collect();
        if !unknown.is_empty() {
            tracing::warn!(
                ?unknown,
                "model expects features the serving pipeline does not build"
            );
        }

        let mut categories = vec![None; booster.feature_names().len()];
        match booster.pandas_categorical() {
            Some(lists) if lists.len() == categorical.len() => {
                for (idx, list) in categorical.iter().zip(lists) {
                    categories[*idx] = Some(CategoryCodes::from_categories(list));
                }
            }
            // Lists for features outside the serving set cannot be matched to columns; every
            // request against such a model is a schema mismatch.
            Some(lists) if !unknown.is_empty() => {
                tracing::warn!(
                    lists = lists.len(),
                    categorical = categorical.len(),
                    "category lists do not line up with the served categorical features"
                );
            }
            Some(lists) => bail!(
                "model stores {} category lists for {} categorical features",
                lists.len(),
                categorical.len()
            ),
            None => {
                for idx in &categorical {
                    categories[*idx] = Some(CategoryCodes::Integer);
                }
            }
        }

        Ok(Self {
            booster,
            categories,
        })
    }

    /// The feature names, in order, that every scored vector must match.
    pub fn feature_order(&self) -> &[String] {
        self.booster.feature_names()
    }

    pub fn booster(&self) -> &Booster {
        &self.booster
    }

    /// Aligns `row` to the model's feature order and encodes it for scoring.
    ///
    /// Fails with the names of every feature the row does not carry.
    pub fn feature_vector(&self, row: &FeatureRow) -> Result<Vec<f64>, Vec<String>> {
        let aligned = row.align(self.feature_order())?;
        Ok(aligned
            .into_iter()
            .zip(&self.categories)
            .map(|(value, codes)| match (value, codes) {
                (FeatureValue::Numeric(v), _) => *v,
                (FeatureValue::Category(label), Some(codes)) => codes.encode(label.as_deref()),
                (FeatureValue::Category(_), None) => f64::NAN,
            })
            .collect())
    }

    pub fn predict_one(&self, features: Vec<f64>) -> anyhow::Result<f64> {
        let out = self.booster.predict(&[features])?;
        let prediction = out.first().copied().context("model produced no output")?;
        ensure!(
            prediction.is_finite(),
            "model produced a non-finite prediction ({prediction})"
        );
        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::features::{RawFeatureRow, RawValue};
    use crate::testing::{forecast_model_text, serving_features, TOY_MODEL};

    fn text(s: &str) -> RawValue {
        RawValue::Text(s.to_string())
    }

    #[test]
    fn encodes_labels_with_stored_categories() {
        let model = ForecastModel::from_model_str(TOY_MODEL).unwrap();
        let row = |store: &str| {
            FeatureRow::normalize(
                &RawFeatureRow::new()
                    .with("store_id", text(store))
                    .with("sell_price", RawValue::Number(2.98))
                    .with("snap_CA", RawValue::Number(1.0)),
            )
        };

        assert_eq!(model.feature_vector(&row("CA_1")).unwrap(), vec![0.0, 2.98, 1.0]);
        assert_eq!(model.feature_vector(&row("TX_1")).unwrap(), vec![2.0, 2.98, 1.0]);
        let unseen = model.feature_vector(&row("WI_3")).unwrap();
        assert!(unseen[0].is_nan());
        assert_eq!(model.predict_one(unseen).unwrap(), -0.375);
    }

    #[test]
    fn vector_follows_model_order() {
        let mut reversed = serving_features();
        reversed.reverse();
        let model = ForecastModel::from_model_str(&forecast_model_text(&reversed)).unwrap();

        let raw = RawFeatureRow::new()
            .with("sell_price", RawValue::Number(2.98))
            .with("store_id", text("CA_1"))
            .with("wm_yr_wk", RawValue::Number(11617.0));
        let v = model.feature_vector(&FeatureRow::normalize(&raw)).unwrap();

        assert_eq!(v.len(), 16);
        let at = |name: &str| v[reversed.iter().position(|n| *n == name).unwrap()];
        assert_eq!(at("sell_price"), 2.98);
        assert_eq!(at("store_id"), 0.0);
        assert_eq!(at("wm_yr_wk"), 11617.0);
        // Sentinel label is not among the stored categories.
        assert!(at("dept_id").is_nan());
    }

    #[test]
    fn reports_missing_model_features() {
        let mut names = serving_features();
        names.push("lag_28");
        let model = ForecastModel::from_model_str(&forecast_model_text(&names)).unwrap();
        let err = model
            .feature_vector(&FeatureRow::normalize(&RawFeatureRow::new()))
            .unwrap_err();
        assert_eq!(err, vec!["lag_28".to_string()]);
    }

    #[test]
    fn rejects_category_list_count_mismatch() {
        let text = TOY_MODEL.replace(
            "pandas_categorical:[[\"CA_1\", \"CA_2\", \"TX_1\"]]",
            "pandas_categorical:[[\"CA_1\"], [\"FOODS\"]]",
        );
        assert!(ForecastModel::from_model_str(&text).is_err());
    }

    #[test]
    fn extra_categorical_feature_loads_and_fails_per_request() {
        let mut names = serving_features();
        names.push("item_id");
        let model_text = forecast_model_text(&names)
            .replace("pandas_categorical:[", "pandas_categorical:[[\"FOODS_3_090\"], ");
        let model = ForecastModel::from_model_str(&model_text).unwrap();
        let err = model
            .feature_vector(&FeatureRow::normalize(&RawFeatureRow::new()))
            .unwrap_err();
        assert_eq!(err, vec!["item_id".to_string()]);
    }

    #[test]
    fn integer_codes_without_stored_categories() {
        let model_text =
            TOY_MODEL.replace("pandas_categorical:[[\"CA_1\", \"CA_2\", \"TX_1\"]]", "");
        let model = ForecastModel::from_model_str(&model_text).unwrap();
        let row = FeatureRow::normalize(&RawFeatureRow::new().with("store_id", RawValue::Number(2.0)));
        assert_eq!(model.feature_vector(&row).unwrap()[0], 2.0);
        let row = FeatureRow::normalize(&RawFeatureRow::new().with("store_id", text("CA_1")));
        assert!(model.feature_vector(&row).unwrap()[0].is_nan());
    }

    #[test]
    fn numeric_category_values_match_labels() {
        assert_eq!(category_label(&serde_json::json!(3)), Some("3".to_string()));
        assert_eq!(category_label(&serde_json::json!(3.0)), Some("3".to_string()));
        assert_eq!(category_label(&serde_json::json!("CA")), Some("CA".to_string()));
        assert_eq!(category_label(&Value::Null), None);
    }
}
