use crewdesk_auth::StoreError;

/// Collapse a `sqlx` failure into the store taxonomy.
///
/// Decode failures mean the row is unusable; everything else is the backend.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => StoreError::Backend(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::ColumnDecode { index, source } => {
            StoreError::Corrupt(format!("{operation}: column {index}: {source}"))
        }
        sqlx::Error::ColumnNotFound(column) => {
            StoreError::Corrupt(format!("{operation}: missing column {column}"))
        }
        other => StoreError::Backend(format!("{operation}: {other}")),
    }
}
