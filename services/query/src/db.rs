//! Postgres connection pool and schema bootstrap for the query database —
//! a separate pool and database from admin-module's, per spec §5's "one
//! pool per database" resource model.

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Open a pool and ensure the schema exists.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Idempotent `CREATE TABLE IF NOT EXISTS` bootstrap, run once at startup.
///
/// A real deployment would drive this with `sqlx::migrate!`, but the
/// embedded-migrations macro needs a live database at build time, which this
/// workspace cannot assume; statements are run directly instead.
async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_documents (
            file_id               UUID PRIMARY KEY,
            original_filename     TEXT NOT NULL,
            storage_filename      TEXT NOT NULL,
            file_size             BIGINT NOT NULL,
            checksum_sha256       TEXT NOT NULL,
            content_type          TEXT NOT NULL,
            description           TEXT,
            tags                  TEXT[] NOT NULL DEFAULT '{}',
            retention_policy      TEXT NOT NULL DEFAULT 'PERMANENT',
            storage_element_id    UUID NOT NULL,
            storage_element_api_url TEXT,
            storage_path          TEXT NOT NULL,
            uploaded_by           TEXT NOT NULL,
            user_metadata         JSONB NOT NULL DEFAULT '{}',
            deleted_at            TIMESTAMPTZ,
            updated_at            TIMESTAMPTZ NOT NULL DEFAULT now(),
            search_vector         TSVECTOR GENERATED ALWAYS AS (
                setweight(to_tsvector('english', coalesce(original_filename, '')), 'A') ||
                setweight(to_tsvector('english', coalesce(description, '')), 'B') ||
                setweight(to_tsvector('english', array_to_string(tags, ' ')), 'C')
            ) STORED
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS search_documents_vector_idx ON search_documents USING GIN (search_vector)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processed_events (
            stream_id  TEXT PRIMARY KEY,
            file_id    UUID NOT NULL,
            event_type TEXT NOT NULL,
            processed_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
