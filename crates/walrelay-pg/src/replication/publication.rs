//! Publication inspection.

use tokio_postgres::Client;
use walrelay_core::RelationRef;

use crate::error::PgResult;

/// Check if a publication exists.
pub async fn publication_exists(client: &Client, publication_name: &str) -> PgResult<bool> {
    let exists: bool = client
        .query_one(
            "SELECT EXISTS(SELECT 1 FROM pg_publication WHERE pubname = $1)",
            &[&publication_name],
        )
        .await?
        .get(0);

    Ok(exists)
}

/// Tables published by `publication_name`, ordered by schema then table.
pub async fn publication_tables(
    client: &Client,
    publication_name: &str,
) -> PgResult<Vec<RelationRef>> {
    let rows = client
        .query(
            r#"
            SELECT schemaname::text, tablename::text
            FROM pg_publication_tables
            WHERE pubname = $1
            ORDER BY schemaname, tablename
            "#,
            &[&publication_name],
        )
        .await?;

    Ok(rows
        .iter()
        .map(|r| RelationRef::new(r.get::<_, String>(0), r.get::<_, String>(1)))
        .collect())
}
