//! Access to the historical sales, calendar, and price relations.
//!
//! Both implementations produce the same columns for a matching row:
//! the sales/calendar/price attributes, `date`, `sales`, `previous_sale_date`, and the three
//! windowed features (`dias_desde_ultima_compra`, `promedio_dias_entre_compras`,
//! `promedio_cantidad`). Only days with positive sales are purchases; the averages span the
//! whole purchase history of the (item, store) pair.

pub mod memory;
pub mod postgres;

pub use memory::{HistorySnapshot, InMemorySalesHistory};
pub use postgres::PgSalesHistory;

use crate::domain::features::RawFeatureRow;
use crate::domain::prediction::SalesKey;

pub const PREVIOUS_SALE_DATE: &str = "previous_sale_date";

#[async_trait::async_trait]
pub trait SalesHistory: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Feature rows for exactly `key.date`; empty when the pair did not sell that day.
    async fn feature_rows(&self, key: &SalesKey) -> anyhow::Result<Vec<RawFeatureRow>>;
}
