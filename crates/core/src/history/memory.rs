use super::{SalesHistory, PREVIOUS_SALE_DATE};
use crate::domain::features::{
    RawFeatureRow, RawValue, AVG_DAYS_BETWEEN_SALES, AVG_SALES_QUANTITY, DAYS_SINCE_LAST_SALE,
};
use crate::domain::prediction::SalesKey;
use anyhow::Context;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleRecord {
    pub item_id: String,
    pub dept_id: String,
    pub cat_id: String,
    pub store_id: String,
    pub state_id: String,
    pub d: String,
    pub sales: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarDay {
    pub d: String,
    pub date: NaiveDate,
    pub wm_yr_wk: i64,
    pub event_name_1: Option<String>,
    pub event_type_1: Option<String>,
    pub event_name_2: Option<String>,
    pub event_type_2: Option<String>,
    pub snap_ca: i64,
    pub snap_tx: i64,
    pub snap_wi: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceRecord {
    pub store_id: String,
    pub item_id: String,
    pub wm_yr_wk: i64,
    pub sell_price: f64,
}

/// The three relations as one JSON document, for offline use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub sales: Vec<SaleRecord>,
    pub calendar: Vec<CalendarDay>,
    pub prices: Vec<PriceRecord>,
}

/// Sales history held in memory, computing the windowed purchase features per lookup.
#[derive(Debug, Clone, Default)]
pub struct InMemorySalesHistory {
    sales: Vec<SaleRecord>,
    calendar: HashMap<String, CalendarDay>,
    prices: HashMap<(String, String, i64), f64>,
}

struct Purchase<'a> {
    sale: &'a SaleRecord,
    day: &'a CalendarDay,
    sell_price: f64,
}

impl InMemorySalesHistory {
    pub fn new(sales: Vec<SaleRecord>, calendar: Vec<CalendarDay>, prices: Vec<PriceRecord>) -> Self {
        Self {
            sales,
            calendar: calendar.into_iter().map(|c| (c.d.clone(), c)).collect(),
            prices: prices
                .into_iter()
                .map(|p| ((p.item_id, p.store_id, p.wm_yr_wk), p.sell_price))
                .collect(),
        }
    }

    pub fn from_snapshot(snapshot: HistorySnapshot) -> Self {
        Self::new(snapshot.sales, snapshot.calendar, snapshot.prices)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read history file {}", path.display()))?;
        let snapshot: HistorySnapshot = serde_json::from_str(&text)
            .with_context(|| format!("history file {} is not a valid snapshot", path.display()))?;
        tracing::info!(
            path = %path.display(),
            sales = snapshot.sales.len(),
            calendar_days = snapshot.calendar.len(),
            prices = snapshot.prices.len(),
            "loaded in-memory sales history"
        );
        Ok(Self::from_snapshot(snapshot))
    }

    // Inner joins against calendar and price, restricted to positive sales, ordered by date.
    fn purchases(&self, store_id: &str, item_id: &str) -> Vec<Purchase<'_>> {
        let mut out: Vec<Purchase<'_>> = self
            .sales
            .iter()
            .filter(|s| s.store_id == store_id && s.item_id == item_id && s.sales > 0.0)
            .filter_map(|sale| {
                let day = self.calendar.get(&sale.d)?;
                let sell_price = *self.prices.get(&(
                    sale.item_id.clone(),
                    sale.store_id.clone(),
                    day.wm_yr_wk,
                ))?;
                Some(Purchase {
                    sale,
                    day,
                    sell_price,
                })
            })
            .collect();
        out.sort_by_key(|p| p.day.date);
        out
    }
}

fn opt_text(v: &Option<String>) -> RawValue {
    match v {
        Some(s) => RawValue::Text(s.clone()),
        None => RawValue::Null,
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

#[async_trait::async_trait]
impl SalesHistory for InMemorySalesHistory {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn feature_rows(&self, key: &SalesKey) -> anyhow::Result<Vec<RawFeatureRow>> {
        let purchases = self.purchases(&key.store_id, &key.item_id);

        let gaps: Vec<Option<i64>> = purchases
            .iter()
            .enumerate()
            .map(|(i, p)| {
                i.checked_sub(1)
                    .map(|prev| (p.day.date - purchases[prev].day.date).num_days())
            })
            .collect();

        // Averages ignore the missing gap of the first purchase, like SQL AVG over NULLs.
        let avg_gap = mean(gaps.iter().flatten().map(|g| *g as f64));
        let avg_sales = mean(purchases.iter().map(|p| p.sale.sales));

        let rows = purchases
            .iter()
            .zip(&gaps)
            .enumerate()
            .filter(|(_, (p, _))| p.day.date == key.date)
            .map(|(i, (p, gap))| {
                let previous = i.checked_sub(1).map(|prev| purchases[prev].day.date);
                RawFeatureRow::new()
                    .with("item_id", RawValue::Text(p.sale.item_id.clone()))
                    .with("dept_id", RawValue::Text(p.sale.dept_id.clone()))
                    .with("cat_id", RawValue::Text(p.sale.cat_id.clone()))
                    .with("store_id", RawValue::Text(p.sale.store_id.clone()))
                    .with("state_id", RawValue::Text(p.sale.state_id.clone()))
                    .with("d", RawValue::Text(p.sale.d.clone()))
                    .with("date", RawValue::Text(p.day.date.to_string()))
                    .with("wm_yr_wk", RawValue::Number(p.day.wm_yr_wk as f64))
                    .with("event_name_1", opt_text(&p.day.event_name_1))
                    .with("event_type_1", opt_text(&p.day.event_type_1))
                    .with("event_name_2", opt_text(&p.day.event_name_2))
                    .with("event_type_2", opt_text(&p.day.event_type_2))
                    .with("snap_CA", RawValue::Number(p.day.snap_ca as f64))
                    .with("snap_TX", RawValue::Number(p.day.snap_tx as f64))
                    .with("snap_WI", RawValue::Number(p.day.snap_wi as f64))
                    .with("sell_price", RawValue::Number(p.sell_price))
                    .with("sales", RawValue::Number(p.sale.sales))
                    .with(
                        PREVIOUS_SALE_DATE,
                        previous.map_or(RawValue::Null, |d| RawValue::Text(d.to_string())),
                    )
                    .with(
                        DAYS_SINCE_LAST_SALE,
                        gap.map_or(RawValue::Null, |g| RawValue::Number(g as f64)),
                    )
                    .with(
                        AVG_DAYS_BETWEEN_SALES,
                        avg_gap.map_or(RawValue::Null, RawValue::Number),
                    )
                    .with(
                        AVG_SALES_QUANTITY,
                        avg_sales.map_or(RawValue::Null, RawValue::Number),
                    )
            })
            .collect();

        Ok(rows)
    }
}
