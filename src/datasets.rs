//! Typed dataset accessors
//!
//! One function per curated table, keyed by `reference_date` and `subsystem`
//! and returning every published measure. Metadata getters return the
//! catalogued description and units.
//!
//! ```rust,no_run
//! use lakehouse::datasets::{ccee, DatasetQuery};
//! # async fn run(client: &lakehouse::LakehouseClient) -> lakehouse::LakehouseResult<()> {
//! let query = DatasetQuery::new()
//!     .filter("subsystem", "SOUTHEAST")
//!     .between("2023-05-01 00:00:00", "2023-05-02 00:00:00")?;
//! let prices = ccee::spot_price(client, &query).await?;
//! # Ok(())
//! # }
//! ```

use crate::client::LakehouseClient;
use crate::error::{LakehouseError, LakehouseResult};
use crate::query::{parse_timestamp, Filters, QuerySpec, ResultTable, SqlValue};
use chrono::NaiveDateTime;

const DATASET_KEYS: [&str; 2] = ["reference_date", "subsystem"];

/// Optional narrowing shared by every accessor
#[derive(Debug, Clone, Default)]
pub struct DatasetQuery {
    pub filters: Filters,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl DatasetQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.filters.insert(column, value);
        self
    }

    pub fn start(mut self, start: NaiveDateTime) -> Self {
        self.start = Some(start);
        self
    }

    pub fn end(mut self, end: NaiveDateTime) -> Self {
        self.end = Some(end);
        self
    }

    /// Half-open range `[start, end)` from text timestamps
    pub fn between(self, start: &str, end: &str) -> LakehouseResult<Self> {
        let parse = |s: &str| {
            parse_timestamp(s)
                .ok_or_else(|| LakehouseError::InvalidQuery(format!("invalid date '{}'", s)))
        };
        Ok(self.start(parse(start)?).end(parse(end)?))
    }

    fn spec(&self, table: &str, values: &[&str]) -> QuerySpec {
        let mut spec = QuerySpec::new(table)
            .keys(&DATASET_KEYS)
            .values(values)
            .filters(self.filters.clone());
        spec.start_date = self.start;
        spec.end_date = self.end;
        spec
    }
}

async fn fetch(
    client: &LakehouseClient,
    table: &str,
    values: &[&str],
    query: &DatasetQuery,
) -> LakehouseResult<ResultTable> {
    client.fetch_dataset(&query.spec(table, values)).await
}

/// Câmara de Comercialização de Energia Elétrica
pub mod ccee {
    use super::*;
    use crate::catalog::builtin::CCEE_SPOT_PRICE;
    use crate::catalog::TableSchema;
    use std::sync::Arc;

    /// Hourly spot price (R$/MWh) by subsystem
    pub async fn spot_price(
        client: &LakehouseClient,
        query: &DatasetQuery,
    ) -> LakehouseResult<ResultTable> {
        fetch(client, CCEE_SPOT_PRICE, &["spot_price"], query).await
    }

    pub async fn spot_price_metadata(client: &LakehouseClient) -> LakehouseResult<Arc<TableSchema>> {
        client.describe_table(CCEE_SPOT_PRICE).await
    }
}

/// Operador Nacional do Sistema Elétrico
pub mod ons {
    use super::*;
    use crate::catalog::builtin::{ONS_LOAD_MARGINAL_COST_WEEKLY, ONS_STORED_ENERGY};
    use crate::catalog::TableSchema;
    use std::sync::Arc;

    /// Reservoir stored energy: capacity, verified amount and percentage
    pub async fn stored_energy(
        client: &LakehouseClient,
        query: &DatasetQuery,
    ) -> LakehouseResult<ResultTable> {
        fetch(
            client,
            ONS_STORED_ENERGY,
            &[
                "max_stored_energy",
                "verified_stored_energy_mwmonth",
                "verified_stored_energy_percentage",
            ],
            query,
        )
        .await
    }

    /// Weekly load marginal cost, average and per load segment
    pub async fn load_marginal_cost_weekly(
        client: &LakehouseClient,
        query: &DatasetQuery,
    ) -> LakehouseResult<ResultTable> {
        fetch(
            client,
            ONS_LOAD_MARGINAL_COST_WEEKLY,
            &[
                "average",
                "light_load_segment",
                "medium_load_segment",
                "heavy_load_segment",
            ],
            query,
        )
        .await
    }

    pub async fn stored_energy_metadata(
        client: &LakehouseClient,
    ) -> LakehouseResult<Arc<TableSchema>> {
        client.describe_table(ONS_STORED_ENERGY).await
    }

    pub async fn load_marginal_cost_weekly_metadata(
        client: &LakehouseClient,
    ) -> LakehouseResult<Arc<TableSchema>> {
        client.describe_table(ONS_LOAD_MARGINAL_COST_WEEKLY).await
    }
}
