use super::SalesHistory;
use crate::domain::features::{RawFeatureRow, RawValue};
use crate::domain::prediction::SalesKey;
use anyhow::{bail, Context};
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

// Purchases are days with positive sales. LAG and the averages run over the whole
// (item, store) purchase history before the final date filter.
const FEATURE_ROW_SQL: &str = r#"
WITH extended_sales AS (
    SELECT
        s.item_id, s.dept_id, s.cat_id, s.store_id, s.state_id, s.d,
        c.date::date AS date, c.wm_yr_wk,
        c.event_name_1, c.event_type_1, c.event_name_2, c.event_type_2,
        c.snap_ca, c.snap_tx, c.snap_wi,
        sp.sell_price, s.sales
    FROM sales s
    INNER JOIN calendar c ON s.d = c.d
    INNER JOIN sell_prices sp ON sp.item_id = s.item_id
        AND sp.store_id = s.store_id
        AND sp.wm_yr_wk = c.wm_yr_wk
    WHERE s.store_id = $1 AND s.item_id = $2
),
purchases AS (
    SELECT
        *,
        LAG(date) OVER (PARTITION BY item_id, store_id ORDER BY date) AS previous_sale_date
    FROM extended_sales
    WHERE sales > 0
),
windowed AS (
    SELECT
        *,
        (date - previous_sale_date) AS dias_desde_ultima_compra,
        (AVG(date - previous_sale_date) OVER (PARTITION BY item_id, store_id))::float8
            AS promedio_dias_entre_compras,
        (AVG(sales) OVER (PARTITION BY item_id, store_id))::float8 AS promedio_cantidad
    FROM purchases
)
SELECT
    item_id::text AS item_id,
    dept_id::text AS dept_id,
    cat_id::text AS cat_id,
    store_id::text AS store_id,
    state_id::text AS state_id,
    d::text AS d,
    date,
    wm_yr_wk::text AS wm_yr_wk,
    event_name_1::text AS event_name_1,
    event_type_1::text AS event_type_1,
    event_name_2::text AS event_name_2,
    event_type_2::text AS event_type_2,
    snap_ca::text AS "snap_CA",
    snap_tx::text AS "snap_TX",
    snap_wi::text AS "snap_WI",
    sell_price::text AS sell_price,
    sales::text AS sales,
    previous_sale_date,
    dias_desde_ultima_compra,
    promedio_dias_entre_compras,
    promedio_cantidad
FROM windowed
WHERE date = $3
"#;

#[derive(Debug, Clone)]
pub struct PgSalesHistory {
    pool: sqlx::PgPool,
}

impl PgSalesHistory {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Builds a pool that connects on first use, so an unreachable database fails
    /// requests rather than startup.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)
            .context("invalid DATABASE_URL")?;
        Ok(Self::new(pool))
    }
}

#[async_trait::async_trait]
impl SalesHistory for PgSalesHistory {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn feature_rows(&self, key: &SalesKey) -> anyhow::Result<Vec<RawFeatureRow>> {
        // The connection goes back to the pool when `conn` drops, on every return path.
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("failed to acquire database connection")?;

        let t0 = std::time::Instant::now();
        let rows = sqlx::query(FEATURE_ROW_SQL)
            .bind(&key.store_id)
            .bind(&key.item_id)
            .bind(key.date)
            .fetch_all(&mut *conn)
            .await
            .context("feature row query failed")?;

        tracing::debug!(
            date = %key.date,
            store_id = %key.store_id,
            item_id = %key.item_id,
            rows = rows.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "feature row query"
        );

        rows.iter().map(decode_row).collect()
    }
}

fn decode_row(row: &PgRow) -> anyhow::Result<RawFeatureRow> {
    let mut out = RawFeatureRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_value(row, idx)
            .with_context(|| format!("failed to decode column {}", column.name()))?;
        out.insert(column.name(), value);
    }
    Ok(out)
}

fn decode_value(row: &PgRow, idx: usize) -> anyhow::Result<RawValue> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(RawValue::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => RawValue::Text(row.try_get::<String, _>(idx)?),
        "FLOAT8" => RawValue::Number(row.try_get::<f64, _>(idx)?),
        "FLOAT4" => RawValue::Number(row.try_get::<f32, _>(idx)? as f64),
        "INT8" => RawValue::Number(row.try_get::<i64, _>(idx)? as f64),
        "INT4" => RawValue::Number(row.try_get::<i32, _>(idx)? as f64),
        "INT2" => RawValue::Number(row.try_get::<i16, _>(idx)? as f64),
        "DATE" => RawValue::Text(row.try_get::<NaiveDate, _>(idx)?.to_string()),
        other => bail!("unsupported column type {other}"),
    };
    Ok(value)
}
