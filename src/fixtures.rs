//! On-disk SQLite snapshot of the lakehouse tables used by tests

use crate::connection::{ConnectionManager, LocalFileSource, ManagerConfig, SqliteDriver};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

const SCHEMA: &str = "
CREATE TABLE alembic_version (version_num TEXT NOT NULL);
INSERT INTO alembic_version VALUES ('4f2a9c1d7e30');

CREATE TABLE ccee_spot_price (
    id INTEGER PRIMARY KEY,
    reference_date TEXT NOT NULL,
    subsystem TEXT NOT NULL,
    spot_price REAL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE TABLE ons_stored_energy (
    id INTEGER PRIMARY KEY,
    reference_date TEXT NOT NULL,
    subsystem TEXT NOT NULL,
    max_stored_energy REAL,
    verified_stored_energy_mwmonth REAL,
    verified_stored_energy_percentage REAL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE TABLE ons_load_marginal_cost_weekly (
    id INTEGER PRIMARY KEY,
    reference_date TEXT NOT NULL,
    subsystem TEXT NOT NULL,
    average REAL,
    light_load_segment REAL,
    medium_load_segment REAL,
    heavy_load_segment REAL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);
";

const DATA: &str = "
-- NORTH was revised: the later revision wins
INSERT INTO ccee_spot_price (reference_date, subsystem, spot_price, updated_at, deleted_at) VALUES
    ('2023-05-01 03:00:00', 'NORTH', 50.0, '2023-05-01 10:00:00', NULL),
    ('2023-05-01 03:00:00', 'NORTH', 69.04, '2023-05-02 10:00:00', NULL),
    ('2023-05-01 03:00:00', 'NORTHEAST', 69.04, '2023-05-01 10:00:00', NULL),
-- SOUTHEAST's newest revision was soft-deleted: the previous one stands
    ('2023-05-01 03:00:00', 'SOUTHEAST', 69.04, '2023-05-01 10:00:00', NULL),
    ('2023-05-01 03:00:00', 'SOUTHEAST', 99.0, '2023-05-03 10:00:00', '2023-05-03 11:00:00'),
    ('2023-05-01 03:00:00', 'SOUTH', 69.04, '2023-05-01 10:00:00', NULL),
-- NORTHWEST only ever had a deleted revision
    ('2023-05-01 03:00:00', 'NORTHWEST', 12.0, '2023-05-01 10:00:00', '2023-05-01 12:00:00'),
-- Outside [03:00, 04:00)
    ('2023-05-01 02:00:00', 'SOUTH', 10.0, '2023-05-01 10:00:00', NULL),
    ('2023-05-01 04:00:00', 'NORTH', 70.0, '2023-05-01 10:00:00', NULL);

INSERT INTO ons_stored_energy (reference_date, subsystem, max_stored_energy,
    verified_stored_energy_mwmonth, verified_stored_energy_percentage, updated_at, deleted_at) VALUES
    ('2023-05-01 00:00:00', 'SOUTHEAST', 204615.0, 175000.5, 85.5, '2023-05-02 08:00:00', NULL),
    ('2023-05-01 00:00:00', 'SOUTH', 20459.0, 15000.0, 73.3, '2023-05-02 08:00:00', NULL),
    ('2023-05-02 00:00:00', 'SOUTHEAST', 204615.0, 176000.0, 86.0, '2023-05-03 08:00:00', NULL);

INSERT INTO ons_load_marginal_cost_weekly (reference_date, subsystem, average,
    light_load_segment, medium_load_segment, heavy_load_segment, updated_at, deleted_at) VALUES
    ('2023-04-29 00:00:00', 'SOUTHEAST', 71.2, 69.0, 71.0, 75.5, '2023-04-28 18:00:00', NULL),
    ('2023-04-29 00:00:00', 'SOUTHEAST', 72.8, 70.1, 72.3, 77.0, '2023-04-30 18:00:00', NULL),
    ('2023-04-29 00:00:00', 'NORTH', 71.2, 69.0, 71.0, 75.5, '2023-04-28 18:00:00', NULL);
";

/// Temporary database file holding the three curated tables with revisions
/// and soft deletes
pub(crate) fn lakehouse_db() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("lakehouse.db");
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    conn.execute_batch(DATA).unwrap();
    (dir, path)
}

/// Manager configured against `path` through the SQLite driver
pub(crate) async fn sqlite_manager(path: &PathBuf) -> Arc<ConnectionManager> {
    let manager = ConnectionManager::new(Arc::new(SqliteDriver), ManagerConfig::default());
    manager
        .configure(Arc::new(LocalFileSource::new(path)))
        .await
        .unwrap();
    Arc::new(manager)
}
