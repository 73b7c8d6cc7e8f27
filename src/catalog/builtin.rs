//! Curated energy-market datasets
//!
//! Descriptions and units for the tables published by CCEE (Câmara de
//! Comercialização de Energia Elétrica) and ONS (Operador Nacional do Sistema
//! Elétrico).

use crate::catalog::schema::{ColumnSchema, DataType, TableSchema};

pub const CCEE_SPOT_PRICE: &str = "ccee_spot_price";
pub const ONS_STORED_ENERGY: &str = "ons_stored_energy";
pub const ONS_LOAD_MARGINAL_COST_WEEKLY: &str = "ons_load_marginal_cost_weekly";

fn reference_date(description: &str) -> ColumnSchema {
    ColumnSchema::new("reference_date", DataType::DateTime).description(description)
}

fn subsystem() -> ColumnSchema {
    ColumnSchema::new("subsystem", DataType::String)
        .description("Electrical subsystem identifier")
}

fn measure(name: &str, description: &str, unit: &str) -> ColumnSchema {
    ColumnSchema::new(name, DataType::Float)
        .description(description)
        .unit(unit)
}

/// All curated tables, in registration order
pub fn builtin_tables() -> Vec<TableSchema> {
    vec![
        TableSchema::new(CCEE_SPOT_PRICE, "CCEE", "Spot Price")
            .description(
                "Hourly electricity spot prices by subsystem in the Brazilian electricity market",
            )
            .column(reference_date("Date and time of the price observation"))
            .column(subsystem())
            .column(measure("spot_price", "Electricity spot price", "R$/MWh")),
        TableSchema::new(ONS_STORED_ENERGY, "ONS", "Stored Energy")
            .description(
                "Reservoir stored energy levels by subsystem from the Brazilian National System Operator",
            )
            .column(reference_date("Date and time of the observation"))
            .column(subsystem())
            .column(measure(
                "max_stored_energy",
                "Maximum storage capacity",
                "MWmonth",
            ))
            .column(measure(
                "verified_stored_energy_mwmonth",
                "Verified stored energy amount",
                "MWmonth",
            ))
            .column(measure(
                "verified_stored_energy_percentage",
                "Verified stored energy as percentage of capacity",
                "%",
            )),
        TableSchema::new(ONS_LOAD_MARGINAL_COST_WEEKLY, "ONS", "Load Marginal Cost Weekly")
            .description(
                "Weekly marginal cost of load by subsystem and load segment from the Brazilian National System Operator",
            )
            .column(reference_date("Date and time of the weekly period"))
            .column(subsystem())
            .column(measure(
                "average",
                "Average marginal cost across all load segments",
                "R$/MWh",
            ))
            .column(measure(
                "light_load_segment",
                "Marginal cost during light load periods",
                "R$/MWh",
            ))
            .column(measure(
                "medium_load_segment",
                "Marginal cost during medium load periods",
                "R$/MWh",
            ))
            .column(measure(
                "heavy_load_segment",
                "Marginal cost during heavy load periods",
                "R$/MWh",
            )),
    ]
}
