use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table the indexer reads or writes. Idempotent.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // The flat search index
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_records (
            uid INTEGER PRIMARY KEY AUTOINCREMENT,
            pid INTEGER NOT NULL DEFAULT 0,
            title TEXT NOT NULL DEFAULT '',
            type TEXT NOT NULL DEFAULT '',
            targetpid TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL DEFAULT '',
            tags TEXT NOT NULL DEFAULT '',
            params TEXT NOT NULL DEFAULT '',
            abstract TEXT NOT NULL DEFAULT '',
            language INTEGER NOT NULL DEFAULT 0,
            starttime INTEGER NOT NULL DEFAULT 0,
            endtime INTEGER NOT NULL DEFAULT 0,
            fe_group TEXT NOT NULL DEFAULT '',
            tstamp INTEGER NOT NULL DEFAULT 0,
            crdate INTEGER NOT NULL DEFAULT 0,
            orig_uid INTEGER NOT NULL DEFAULT 0,
            orig_pid INTEGER NOT NULL DEFAULT 0,
            sortdate INTEGER NOT NULL DEFAULT 0,
            hash TEXT NOT NULL DEFAULT '',
            directory TEXT NOT NULL DEFAULT '',
            hidden_content TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Durable key/value state: run lock, last run, job status
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS registry (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Host platform: page tree
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages (
            uid INTEGER PRIMARY KEY,
            pid INTEGER NOT NULL DEFAULT 0,
            title TEXT NOT NULL DEFAULT '',
            abstract TEXT NOT NULL DEFAULT '',
            bodytext TEXT NOT NULL DEFAULT '',
            sys_language_uid INTEGER NOT NULL DEFAULT 0,
            hidden INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            no_search INTEGER NOT NULL DEFAULT 0,
            starttime INTEGER NOT NULL DEFAULT 0,
            endtime INTEGER NOT NULL DEFAULT 0,
            fe_group TEXT NOT NULL DEFAULT '',
            facet_options TEXT NOT NULL DEFAULT '',
            t3ver_state INTEGER NOT NULL DEFAULT 0,
            t3ver_wsid INTEGER NOT NULL DEFAULT 0,
            tstamp INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Host platform: facet options (tags)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS filter_options (
            uid INTEGER PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            tag TEXT NOT NULL DEFAULT '',
            sys_language_uid INTEGER NOT NULL DEFAULT 0,
            automated_tagging TEXT NOT NULL DEFAULT '',
            automated_tagging_exclude TEXT NOT NULL DEFAULT '',
            hidden INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Host platform: system categories and their assignments
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            uid INTEGER PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            hidden INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS category_relations (
            category INTEGER NOT NULL,
            tablename TEXT NOT NULL,
            record INTEGER NOT NULL,
            sorting INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (category, tablename, record)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Host platform: managed files, their metadata and references
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            uid INTEGER PRIMARY KEY,
            storage INTEGER NOT NULL,
            identifier TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            alternative TEXT NOT NULL DEFAULT '',
            language TEXT NOT NULL DEFAULT '',
            fe_groups TEXT NOT NULL DEFAULT '',
            UNIQUE(storage, identifier)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_references (
            uid INTEGER PRIMARY KEY AUTOINCREMENT,
            file INTEGER NOT NULL,
            tablenames TEXT NOT NULL,
            fieldname TEXT NOT NULL,
            uid_foreign INTEGER NOT NULL,
            sys_language_uid INTEGER NOT NULL DEFAULT 0,
            sorting_foreign INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_collection_items (
            collection INTEGER NOT NULL,
            file INTEGER NOT NULL,
            sorting INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (collection, file)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_index_records_identity ON index_records(orig_uid, pid, type, language)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_index_records_file ON index_records(hash, pid, sortdate, language)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_index_records_tstamp ON index_records(tstamp)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_pid ON pages(pid)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_file_references_foreign ON file_references(tablenames, fieldname, uid_foreign)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
