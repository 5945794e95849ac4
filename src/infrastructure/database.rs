use crate::config::MoverConfig;
use crate::entities::organizations;
use crate::error::{MoverError, Result};
use crate::services::connection::{ConnectionManager, ConnectionSupplier, ManagedConnection};
use crate::services::metadata::{OrganizationQueries, SeaOrganizationQueries};
use async_trait::async_trait;
use sea_orm::sea_query::{Alias, ColumnDef, Table};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

fn connect_options(db_url: &str) -> ConnectOptions {
    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(50)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);
    opt
}

/// Opens the metadata database through the token-refreshing connection
/// manager and makes sure its tables exist. Every store built on the returned
/// manager picks up a fresh auth token whenever the current one expires.
pub async fn setup_database(
    config: &MoverConfig,
) -> anyhow::Result<Arc<ConnectionManager<PostgresSupplier>>> {
    info!("📂 Metadata database: {}", redact(&config.database_url));
    if config.db_auth_token_file.is_some() {
        info!(
            "🔑 Token authentication enabled (connections re-authorized every {:?})",
            config.db_auth_ttl
        );
    }

    let connections = Arc::new(ConnectionManager::connect(PostgresSupplier::new(config)).await?);

    info!("✅ Database connected successfully");

    let db = connections.get_connection().await?;
    run_migrations(&db, &config.manifest_table, &config.manifest_file_table).await?;

    Ok(connections)
}

pub async fn run_migrations(
    db: &DatabaseConnection,
    manifest_table: &str,
    manifest_file_table: &str,
) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    info!("🔄 Ensuring metadata tables exist...");

    let stmts = vec![
        schema
            .create_table_from_entity(organizations::Entity)
            .if_not_exists()
            .to_owned(),
        Table::create()
            .table(Alias::new(manifest_table))
            .if_not_exists()
            .col(ColumnDef::new(Alias::new("id")).string().not_null().primary_key())
            .col(ColumnDef::new(Alias::new("organization_id")).big_integer().not_null())
            .col(ColumnDef::new(Alias::new("dataset_id")).big_integer().not_null())
            .col(ColumnDef::new(Alias::new("status")).string().not_null())
            .to_owned(),
        Table::create()
            .table(Alias::new(manifest_file_table))
            .if_not_exists()
            .col(
                ColumnDef::new(Alias::new("upload_id"))
                    .string()
                    .not_null()
                    .primary_key(),
            )
            .col(ColumnDef::new(Alias::new("manifest_id")).string().not_null())
            .col(ColumnDef::new(Alias::new("file_path")).string().not_null())
            .col(ColumnDef::new(Alias::new("size")).big_integer().null())
            .col(ColumnDef::new(Alias::new("status")).string().not_null())
            .col(ColumnDef::new(Alias::new("updated_at")).timestamp_with_time_zone().null())
            .to_owned(),
    ];

    for stmt in stmts {
        db.execute(builder.build(&stmt)).await?;
    }

    // Table names come from configuration; only plain identifiers get the index.
    if manifest_file_table
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        let index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{0}_status ON {0}(status, upload_id)",
            manifest_file_table
        );
        db.execute(sea_orm::Statement::from_string(builder, index))
            .await?;
    } else {
        tracing::debug!("   - Skipping status index for table '{}'", manifest_file_table);
    }

    Ok(())
}

fn redact(db_url: &str) -> String {
    match Url::parse(db_url) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("****"));
            url.to_string()
        }
        _ => db_url.to_string(),
    }
}

#[async_trait]
impl ManagedConnection for DatabaseConnection {
    async fn probe(&self) -> Result<()> {
        self.ping().await?;
        Ok(())
    }

    async fn release(self) -> Result<()> {
        self.close().await?;
        Ok(())
    }

    fn queries(&self) -> Arc<dyn OrganizationQueries> {
        Arc::new(SeaOrganizationQueries::new(self.clone()))
    }
}

/// Opens relational connections whose password is a short-lived auth token.
///
/// The token is read from `DB_AUTH_TOKEN_FILE` on every connect, so a rotated
/// token is picked up on the next refresh.
pub struct PostgresSupplier {
    database_url: String,
    token_file: Option<String>,
    auth_ttl: Duration,
}

impl PostgresSupplier {
    pub fn new(config: &MoverConfig) -> Self {
        Self {
            database_url: config.database_url.clone(),
            token_file: config.db_auth_token_file.clone(),
            auth_ttl: config.db_auth_ttl,
        }
    }

    async fn connection_url(&self) -> Result<String> {
        let Some(path) = &self.token_file else {
            return Ok(self.database_url.clone());
        };

        let token = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| MoverError::ConnectionRefresh(format!("reading {}: {}", path, e)))?;

        let mut url = Url::parse(&self.database_url).map_err(|e| MoverError::InvalidConfig {
            name: "DATABASE_URL",
            value: e.to_string(),
        })?;
        url.set_password(Some(token.trim()))
            .map_err(|_| MoverError::InvalidConfig {
                name: "DATABASE_URL",
                value: "URL cannot carry a password".to_string(),
            })?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl ConnectionSupplier for PostgresSupplier {
    type Connection = DatabaseConnection;

    async fn connect(&self) -> Result<(DatabaseConnection, Duration)> {
        let url = self.connection_url().await?;
        let mut opt = connect_options(&url);
        opt.max_lifetime(self.auth_ttl);

        let db = Database::connect(opt).await?;
        Ok((db, self.auth_ttl))
    }
}
