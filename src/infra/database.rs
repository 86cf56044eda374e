use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;

/// Open (and create if needed) the SQLite database shared by the job ledger
/// and the content store.
pub async fn connect_sqlite(database_url: &str) -> anyhow::Result<Pool<Sqlite>> {
    // Ensure the file exists if it's a file path
    let path_str = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
        if let Some(parent) = Path::new(path_str).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::File::create(path_str)?;
    }

    let conn_str = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite://{}", database_url)
    };

    // An in-memory database only lives as long as its connection.
    let max_connections = if conn_str.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&conn_str)
        .await?;
    Ok(pool)
}
