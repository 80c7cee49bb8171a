//! Postgres connection pool and schema bootstrap for the admin database.

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
        CREATE TABLE IF NOT EXISTS storage_elements (
            id              UUID PRIMARY KEY,
            name            TEXT NOT NULL UNIQUE,
            element_id      TEXT NOT NULL UNIQUE,
            mode            TEXT NOT NULL,
            storage_type    TEXT NOT NULL,
            api_url         TEXT NOT NULL,
            base_path       TEXT NOT NULL,
            capacity_bytes  BIGINT NOT NULL,
            used_bytes      BIGINT NOT NULL DEFAULT 0,
            file_count      BIGINT NOT NULL DEFAULT 0,
            priority        INT NOT NULL,
            retention_days  INT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'ONLINE',
            last_health_check TIMESTAMPTZ,
            deleted_at      TIMESTAMPTZ,
            created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at      TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS service_accounts (
            id                  UUID PRIMARY KEY,
            name                TEXT NOT NULL UNIQUE,
            client_id           TEXT NOT NULL UNIQUE,
            client_secret_hash  TEXT NOT NULL,
            secret_history      JSONB NOT NULL DEFAULT '[]',
            role                TEXT NOT NULL,
            status              TEXT NOT NULL DEFAULT 'ACTIVE',
            rate_limit          INT NOT NULL DEFAULT 600,
            environment         TEXT NOT NULL DEFAULT 'production',
            is_system           BOOLEAN NOT NULL DEFAULT false,
            secret_expires_at   TIMESTAMPTZ,
            created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at          TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS admin_users (
            id              UUID PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            password_hash   TEXT NOT NULL,
            password_history JSONB NOT NULL DEFAULT '[]',
            role            TEXT NOT NULL,
            is_system       BOOLEAN NOT NULL DEFAULT false,
            failed_attempts INT NOT NULL DEFAULT 0,
            locked_until    TIMESTAMPTZ,
            last_login_at   TIMESTAMPTZ,
            created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at      TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jwt_keys (
            version         UUID PRIMARY KEY,
            public_key_pem  TEXT NOT NULL,
            private_key_pem TEXT NOT NULL,
            created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
            expires_at      TIMESTAMPTZ NOT NULL,
            is_active       BOOLEAN NOT NULL DEFAULT true,
            rotation_count  INT NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            file_id             UUID PRIMARY KEY,
            original_filename   TEXT NOT NULL,
            storage_filename    TEXT NOT NULL,
            file_size           BIGINT NOT NULL,
            checksum_sha256     TEXT NOT NULL,
            content_type        TEXT NOT NULL,
            description         TEXT,
            retention_policy    TEXT NOT NULL,
            ttl_expires_at      TIMESTAMPTZ,
            ttl_days            INT,
            finalized_at        TIMESTAMPTZ,
            storage_element_id  UUID NOT NULL REFERENCES storage_elements(id),
            storage_path        TEXT NOT NULL,
            compressed           BOOLEAN NOT NULL DEFAULT false,
            compression_algorithm TEXT,
            original_size        BIGINT,
            uploaded_by          TEXT NOT NULL,
            upload_source_ip     TEXT,
            user_metadata         JSONB NOT NULL DEFAULT '{}',
            deleted_at           TIMESTAMPTZ,
            deletion_reason      TEXT,
            created_at           TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at           TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id              UUID PRIMARY KEY,
            actor_type      TEXT NOT NULL,
            actor_id        TEXT,
            action          TEXT NOT NULL,
            resource_type   TEXT NOT NULL,
            resource_id     TEXT,
            ip_address      TEXT,
            user_agent      TEXT,
            outcome         TEXT NOT NULL,
            detail          JSONB NOT NULL DEFAULT '{}',
            created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
