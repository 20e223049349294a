// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for cloud-adaptor-core.
//!
//! Both migrators are embedded at compile time. [`crate::persistence::SqlitePersistence::from_path`]
//! and [`crate::persistence::MySqlPersistence::connect`] run them automatically;
//! callers building their own pool can run them explicitly:
//!
//! ```ignore
//! let pool = sqlx::SqlitePool::connect("sqlite::memory:").await?;
//! cloud_adaptor_core::migrations::run_sqlite(&pool).await?;
//! ```

use sqlx::migrate::MigrateError;

/// MySQL migrator with all migrations embedded.
pub static MYSQL: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/mysql");

/// SQLite migrator with all migrations embedded.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Run MySQL migrations.
///
/// Safe to call multiple times; already-applied migrations are skipped.
pub async fn run_mysql(pool: &sqlx::MySqlPool) -> Result<(), MigrateError> {
    MYSQL.run(pool).await
}

/// Run SQLite migrations.
///
/// Safe to call multiple times; already-applied migrations are skipped.
pub async fn run_sqlite(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}
