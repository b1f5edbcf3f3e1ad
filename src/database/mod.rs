pub mod models;
pub mod schema;
pub mod utils;

use std::path::{Path, PathBuf};

use diesel::r2d2::{self, ConnectionManager};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database initialization error: {0}")]
    Init(String),

    #[error("database migration error: {0}")]
    Migration(String),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::Error),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("diesel error: {0}")]
    Diesel(#[from] diesel::result::Error),
}

/// Build a pooled connection to the sqlite file at `db_path`, creating its
/// parent directory and running pending migrations.
pub fn init(db_path: &Path) -> Result<DbPool, DbError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DbError::Init(format!("failed to create database directory: {e}")))?;
    }
    let db_url = db_path.to_string_lossy().to_string();

    tracing::info!(path = %db_url, "initializing database");

    let manager = ConnectionManager::<SqliteConnection>::new(&db_url);
    let pool = r2d2::Pool::builder()
        .max_size(10)
        .build(manager)
        .map_err(|e| DbError::Init(format!("failed to create connection pool: {e}")))?;

    let mut conn = pool
        .get()
        .map_err(|e| DbError::Init(format!("failed to get database connection: {e}")))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| DbError::Migration(e.to_string()))?;

    tracing::info!("database initialized successfully");
    Ok(pool)
}

/// In-memory sqlite pool, handy for tests.
pub fn init_in_memory() -> Result<DbPool, DbError> {
    let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
    let pool = r2d2::Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| DbError::Init(format!("failed to create connection pool: {e}")))?;
    let mut conn = pool
        .get()
        .map_err(|e| DbError::Init(format!("failed to get database connection: {e}")))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| DbError::Migration(e.to_string()))?;
    Ok(pool)
}

pub fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".kiln").join("kiln.db"))
        .unwrap_or_else(|| PathBuf::from("kiln.db"))
}
