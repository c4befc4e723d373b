use std::collections::BTreeMap;

/// Features the model treats as discrete classes.
pub const CATEGORICAL_FEATURES: [&str; 8] = [
    "dept_id",
    "cat_id",
    "store_id",
    "state_id",
    "event_name_1",
    "event_type_1",
    "event_name_2",
    "event_type_2",
];

/// Features coerced to `f64`; anything non-numeric becomes 0.
pub const NUMERIC_FEATURES: [&str; 8] = [
    "wm_yr_wk",
    "snap_CA",
    "snap_TX",
    "snap_WI",
    "sell_price",
    "dias_desde_ultima_compra",
    "promedio_dias_entre_compras",
    "promedio_cantidad",
];

pub const DAYS_SINCE_LAST_SALE: &str = "dias_desde_ultima_compra";
pub const AVG_DAYS_BETWEEN_SALES: &str = "promedio_dias_entre_compras";
pub const AVG_SALES_QUANTITY: &str = "promedio_cantidad";

/// Label synthesized for a categorical column the data store did not return.
pub const UNKNOWN_CATEGORY: &str = "None";

pub fn is_categorical(name: &str) -> bool {
    CATEGORICAL_FEATURES.contains(&name)
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Number(f64),
    Text(String),
}

impl RawValue {
    fn to_label(&self) -> Option<String> {
        match self {
            RawValue::Null => None,
            RawValue::Text(s) => Some(s.clone()),
            RawValue::Number(n) if n.is_nan() => None,
            RawValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                Some(format!("{}", *n as i64))
            }
            RawValue::Number(n) => Some(n.to_string()),
        }
    }

    fn to_number(&self) -> f64 {
        let value = match self {
            RawValue::Null => None,
            RawValue::Number(n) => Some(*n),
            RawValue::Text(s) => s.trim().parse::<f64>().ok(),
        };
        value.filter(|v| !v.is_nan()).unwrap_or(0.0)
    }
}

/// One record as returned by the historical store, columns in store order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFeatureRow {
    columns: Vec<(String, RawValue)>,
}

impl RawFeatureRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column, replacing an earlier value with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: RawValue) {
        let name = name.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.columns.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: RawValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    /// `None` is a missing label, which scores like an unseen category.
    Category(Option<String>),
    Numeric(f64),
}

/// A complete, typed feature row: every categorical and numeric feature is always present.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    values: BTreeMap<&'static str, FeatureValue>,
}

impl FeatureRow {
    pub fn normalize(raw: &RawFeatureRow) -> Self {
        let mut values = BTreeMap::new();

        for name in CATEGORICAL_FEATURES {
            let label = match raw.get(name) {
                Some(v) => v.to_label(),
                None => Some(UNKNOWN_CATEGORY.to_string()),
            };
            values.insert(name, FeatureValue::Category(label));
        }

        // A null gap (first purchase) falls out of the numeric coercion as 0.
        for name in NUMERIC_FEATURES {
            let value = raw.get(name).map(RawValue::to_number).unwrap_or(0.0);
            values.insert(name, FeatureValue::Numeric(value));
        }

        Self { values }
    }

    pub fn numeric(&self, name: &str) -> Option<f64> {
        match self.values.get(name)? {
            FeatureValue::Numeric(v) => Some(*v),
            FeatureValue::Category(_) => None,
        }
    }

    pub fn category(&self, name: &str) -> Option<Option<&str>> {
        match self.values.get(name)? {
            FeatureValue::Category(label) => Some(label.as_deref()),
            FeatureValue::Numeric(_) => None,
        }
    }

    /// Selects the features in `order`. Fails with every name this row cannot supply.
    pub fn align(&self, order: &[String]) -> Result<Vec<&FeatureValue>, Vec<String>> {
        let mut aligned = Vec::with_capacity(order.len());
        let mut missing = Vec::new();
        for name in order {
            match self.values.get(name.as_str()) {
                Some(v) => aligned.push(v),
                None => missing.push(name.clone()),
            }
        }
        if missing.is_empty() {
            Ok(aligned)
        } else {
            Err(missing)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> RawValue {
        RawValue::Text(s.to_string())
    }

    #[test]
    fn absent_categoricals_get_the_sentinel_label() {
        let raw = RawFeatureRow::new().with("store_id", text("CA_1"));
        let row = FeatureRow::normalize(&raw);

        assert_eq!(row.category("store_id"), Some(Some("CA_1")));
        for name in CATEGORICAL_FEATURES.iter().filter(|n| **n != "store_id") {
            assert_eq!(row.category(name), Some(Some(UNKNOWN_CATEGORY)), "{name}");
        }
    }

    #[test]
    fn null_categorical_is_a_missing_label() {
        let raw = RawFeatureRow::new().with("event_name_1", RawValue::Null);
        let row = FeatureRow::normalize(&raw);
        assert_eq!(row.category("event_name_1"), Some(None));
    }

    #[test]
    fn numeric_category_values_render_as_labels() {
        let raw = RawFeatureRow::new()
            .with("dept_id", RawValue::Number(3.0))
            .with("cat_id", RawValue::Number(1.5));
        let row = FeatureRow::normalize(&raw);
        assert_eq!(row.category("dept_id"), Some(Some("3")));
        assert_eq!(row.category("cat_id"), Some(Some("1.5")));
    }

    #[test]
    fn numeric_coercion_defaults_to_zero() {
        let raw = RawFeatureRow::new()
            .with("sell_price", text(""))
            .with("snap_CA", text(" 1 "))
            .with("snap_TX", text("yes"))
            .with("snap_WI", RawValue::Number(f64::NAN))
            .with("wm_yr_wk", RawValue::Number(11617.0))
            .with(DAYS_SINCE_LAST_SALE, RawValue::Null);
        let row = FeatureRow::normalize(&raw);

        assert_eq!(row.numeric("sell_price"), Some(0.0));
        assert_eq!(row.numeric("snap_CA"), Some(1.0));
        assert_eq!(row.numeric("snap_TX"), Some(0.0));
        assert_eq!(row.numeric("snap_WI"), Some(0.0));
        assert_eq!(row.numeric("wm_yr_wk"), Some(11617.0));
        assert_eq!(row.numeric(DAYS_SINCE_LAST_SALE), Some(0.0));
        // Never returned by the store at all.
        assert_eq!(row.numeric(AVG_SALES_QUANTITY), Some(0.0));
    }

    #[test]
    fn normalized_row_is_always_complete() {
        let row = FeatureRow::normalize(&RawFeatureRow::new());
        let all: Vec<String> = CATEGORICAL_FEATURES
            .iter()
            .chain(NUMERIC_FEATURES.iter())
            .map(|s| s.to_string())
            .collect();
        assert_eq!(row.align(&all).unwrap().len(), 16);
    }

    #[test]
    fn align_follows_requested_order_not_store_order() {
        let raw = RawFeatureRow::new()
            .with("sell_price", RawValue::Number(2.98))
            .with("store_id", text("CA_1"))
            .with("snap_CA", RawValue::Number(1.0));
        let row = FeatureRow::normalize(&raw);

        let order = vec![
            "snap_CA".to_string(),
            "store_id".to_string(),
            "sell_price".to_string(),
        ];
        let aligned = row.align(&order).unwrap();
        assert_eq!(
            aligned,
            vec![
                &FeatureValue::Numeric(1.0),
                &FeatureValue::Category(Some("CA_1".to_string())),
                &FeatureValue::Numeric(2.98),
            ]
        );
    }

    #[test]
    fn align_reports_every_missing_column() {
        let row = FeatureRow::normalize(&RawFeatureRow::new());
        let order = vec![
            "sell_price".to_string(),
            "lag_7".to_string(),
            "store_id".to_string(),
            "rolling_mean_28".to_string(),
        ];
        assert_eq!(
            row.align(&order).unwrap_err(),
            vec!["lag_7".to_string(), "rolling_mean_28".to_string()]
        );
    }

    #[test]
    fn raw_row_insert_replaces_existing_column() {
        let mut raw = RawFeatureRow::new().with("sales", RawValue::Number(1.0));
        raw.insert("sales", RawValue::Number(2.0));
        assert_eq!(raw.len(), 1);
        assert_eq!(raw.get("sales"), Some(&RawValue::Number(2.0)));
    }
}
