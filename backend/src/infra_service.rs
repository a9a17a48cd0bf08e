// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, Executor, PgPool};

use crate::{errors::ServiceCreationError, settings::DatabaseSettings};

/// Connect to the configured Postgres server, creating the database if it
/// does not exist yet, and run the embedded migrations.
pub async fn provision_pool(
    database_settings: &DatabaseSettings,
) -> Result<PgPool, ServiceCreationError> {
    let connection =
        PgPool::connect(&database_settings.connection_string_without_database()).await?;

    let db_name = database_settings.name.as_str();
    let db_exists: bool = sqlx::query_scalar(
        "select exists (
            SELECT datname FROM pg_catalog.pg_database WHERE datname = $1
        )",
    )
    .bind(db_name)
    .fetch_one(&connection)
    .await?;

    if !db_exists {
        connection
            .execute(format!(r#"CREATE DATABASE "{}";"#, db_name).as_str())
            .await?;
        tracing::info!("Successfully created database {}", db_name);
    }

    let db_pool = PgPoolOptions::new()
        .max_connections(database_settings.max_connections)
        .connect(&database_settings.connection_string())
        .await?;

    tracing::info!("Running database migration");
    sqlx::migrate!("./migrations").run(&db_pool).await?;
    tracing::info!("Database migration successful");

    Ok(db_pool)
}

#[async_trait]
pub trait InfraService: Sized {
    async fn new(database_settings: &DatabaseSettings) -> Result<Self, ServiceCreationError> {
        let db_pool = provision_pool(database_settings).await?;
        Self::initialize(db_pool).await
    }

    async fn initialize(db_pool: PgPool) -> Result<Self, ServiceCreationError>;
}
