//! The flat search index table.
//!
//! All persistence of [`IndexRecord`]s goes through [`IndexStore`]. Lookups
//! follow the two natural keys: `(orig_uid, pid, type, language)` for regular
//! records and `(type, hash, pid, sortdate, language)` for file records.

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::info;

use crate::hooks::AdditionalField;
use crate::models::{FieldValue, IndexRecord, StoredRecord};

/// Columns every index row has. Registered additional fields with one of
/// these names map onto the existing column.
pub const CORE_COLUMNS: &[&str] = &[
    "uid",
    "pid",
    "title",
    "type",
    "targetpid",
    "content",
    "tags",
    "params",
    "abstract",
    "language",
    "starttime",
    "endtime",
    "fe_group",
    "tstamp",
    "crdate",
    "orig_uid",
    "orig_pid",
    "sortdate",
    "hash",
    "directory",
    "hidden_content",
];

const SELECT_COLUMNS: &str = "uid, pid, title, type, targetpid, content, tags, params, abstract, \
     language, starttime, endtime, fe_group, tstamp, crdate, orig_uid, orig_pid, sortdate, \
     hash, directory, hidden_content";

pub fn is_core_column(name: &str) -> bool {
    CORE_COLUMNS.contains(&name)
}

fn is_valid_column_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Clone)]
pub struct IndexStore {
    pool: SqlitePool,
}

impl IndexStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Add a column for every registered field the table does not have yet.
    /// Returns the names of the columns that were added.
    pub async fn ensure_columns(&self, fields: &[AdditionalField]) -> Result<Vec<String>, sqlx::Error> {
        let existing: Vec<String> = sqlx::query("PRAGMA table_info(index_records)")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();

        let mut added = Vec::new();
        for field in fields {
            if existing.contains(&field.name) || added.contains(&field.name) {
                continue;
            }
            if !is_valid_column_name(&field.name) {
                return Err(sqlx::Error::Protocol(format!(
                    "invalid additional field name '{}'",
                    field.name
                )));
            }
            let ddl = match &field.default {
                FieldValue::Int(v) => format!(
                    "ALTER TABLE index_records ADD COLUMN \"{}\" INTEGER NOT NULL DEFAULT {}",
                    field.name, v
                ),
                FieldValue::Text(v) => format!(
                    "ALTER TABLE index_records ADD COLUMN \"{}\" TEXT NOT NULL DEFAULT '{}'",
                    field.name,
                    v.replace('\'', "''")
                ),
            };
            sqlx::query(&ddl).execute(&self.pool).await?;
            info!(column = %field.name, "added index column");
            added.push(field.name.clone());
        }
        Ok(added)
    }

    /// Existing row with the same identity as `record`, if any.
    pub async fn find_by_natural_key(
        &self,
        record: &IndexRecord,
    ) -> Result<Option<StoredRecord>, sqlx::Error> {
        if record.is_file() {
            return self
                .find_file_record(
                    &record.record_type,
                    &record.hash,
                    record.storage_pid,
                    record.sortdate,
                    record.language,
                )
                .await;
        }
        let row = sqlx::query(&format!(
            "SELECT {} FROM index_records WHERE orig_uid = ? AND pid = ? AND type = ? AND language = ? ORDER BY uid LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(record.orig_uid)
        .bind(record.storage_pid)
        .bind(&record.record_type)
        .bind(record.language)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(stored_record))
    }

    /// File row indexed from the same path with the same modification time.
    pub async fn find_file_record(
        &self,
        record_type: &str,
        hash: &str,
        pid: i64,
        sortdate: i64,
        language: i64,
    ) -> Result<Option<StoredRecord>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM index_records WHERE type = ? AND hash = ? AND pid = ? AND sortdate = ? AND language = ? ORDER BY uid LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(record_type)
        .bind(hash)
        .bind(pid)
        .bind(sortdate)
        .bind(language)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(stored_record))
    }

    pub async fn insert(&self, record: &IndexRecord, now: i64) -> Result<i64, sqlx::Error> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO index_records (pid, title, type, targetpid, content, tags, params, abstract, \
             language, starttime, endtime, fe_group, tstamp, crdate, orig_uid, orig_pid, sortdate, \
             hash, directory, hidden_content",
        );
        for name in record.extra.keys() {
            qb.push(format!(", \"{}\"", name));
        }
        qb.push(") VALUES (");
        {
            let mut values = qb.separated(", ");
            values
                .push_bind(record.storage_pid)
                .push_bind(record.title.as_str())
                .push_bind(record.record_type.as_str())
                .push_bind(record.target_pid.as_str())
                .push_bind(record.content.as_str())
                .push_bind(record.tags.as_str())
                .push_bind(record.params.as_str())
                .push_bind(record.abstract_text.as_str())
                .push_bind(record.language)
                .push_bind(record.starttime)
                .push_bind(record.endtime)
                .push_bind(record.fe_group.as_str())
                .push_bind(now)
                .push_bind(now)
                .push_bind(record.orig_uid)
                .push_bind(record.orig_pid)
                .push_bind(record.sortdate)
                .push_bind(record.hash.as_str())
                .push_bind(record.directory.as_str())
                .push_bind(record.hidden_content.as_str());
            for value in record.extra.values() {
                match value {
                    FieldValue::Int(v) => values.push_bind(*v),
                    FieldValue::Text(v) => values.push_bind(v.as_str()),
                };
            }
        }
        qb.push(")");

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.last_insert_rowid())
    }

    /// Overwrite every field of row `uid` except `uid` and `crdate`.
    pub async fn update(&self, uid: i64, record: &IndexRecord, now: i64) -> Result<(), sqlx::Error> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE index_records SET ");
        {
            let mut set = qb.separated(", ");
            set.push("pid = ").push_bind_unseparated(record.storage_pid);
            set.push("title = ").push_bind_unseparated(record.title.as_str());
            set.push("type = ").push_bind_unseparated(record.record_type.as_str());
            set.push("targetpid = ").push_bind_unseparated(record.target_pid.as_str());
            set.push("content = ").push_bind_unseparated(record.content.as_str());
            set.push("tags = ").push_bind_unseparated(record.tags.as_str());
            set.push("params = ").push_bind_unseparated(record.params.as_str());
            set.push("abstract = ").push_bind_unseparated(record.abstract_text.as_str());
            set.push("language = ").push_bind_unseparated(record.language);
            set.push("starttime = ").push_bind_unseparated(record.starttime);
            set.push("endtime = ").push_bind_unseparated(record.endtime);
            set.push("fe_group = ").push_bind_unseparated(record.fe_group.as_str());
            set.push("tstamp = ").push_bind_unseparated(now);
            set.push("orig_uid = ").push_bind_unseparated(record.orig_uid);
            set.push("orig_pid = ").push_bind_unseparated(record.orig_pid);
            set.push("sortdate = ").push_bind_unseparated(record.sortdate);
            set.push("hash = ").push_bind_unseparated(record.hash.as_str());
            set.push("directory = ").push_bind_unseparated(record.directory.as_str());
            set.push("hidden_content = ").push_bind_unseparated(record.hidden_content.as_str());
            for (name, value) in &record.extra {
                set.push(format!("\"{}\" = ", name));
                match value {
                    FieldValue::Int(v) => set.push_bind_unseparated(*v),
                    FieldValue::Text(v) => set.push_bind_unseparated(v.as_str()),
                };
            }
        }
        qb.push(" WHERE uid = ").push_bind(uid);

        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    pub async fn get(&self, uid: i64) -> Result<Option<StoredRecord>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM index_records WHERE uid = ?",
            SELECT_COLUMNS
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(stored_record))
    }

    /// Every row, oldest first.
    pub async fn list(&self) -> Result<Vec<StoredRecord>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM index_records ORDER BY uid",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(stored_record).collect())
    }

    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM index_records")
            .fetch_one(&self.pool)
            .await
    }

    pub async fn count_older_than(&self, cutoff: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM index_records WHERE tstamp < ?")
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn delete_older_than(&self, cutoff: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM index_records WHERE tstamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// File rows below `pid` that were not touched since `since`.
    pub async fn find_outdated_file_records(
        &self,
        pid: i64,
        since: i64,
    ) -> Result<Vec<StoredRecord>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM index_records WHERE type LIKE 'file%' AND pid = ? AND tstamp < ? ORDER BY uid",
            SELECT_COLUMNS
        ))
        .bind(pid)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(stored_record).collect())
    }

    pub async fn delete_by_uid(&self, uid: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM index_records WHERE uid = ?")
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_by_unique_properties(
        &self,
        orig_uid: i64,
        pid: i64,
        record_type: &str,
        language: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM index_records WHERE orig_uid = ? AND pid = ? AND type = ? AND language = ?",
        )
        .bind(orig_uid)
        .bind(pid)
        .bind(record_type)
        .bind(language)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn stored_record(row: &SqliteRow) -> StoredRecord {
    StoredRecord {
        uid: row.get("uid"),
        tstamp: row.get("tstamp"),
        crdate: row.get("crdate"),
        record: IndexRecord {
            storage_pid: row.get("pid"),
            title: row.get("title"),
            record_type: row.get("type"),
            target_pid: row.get("targetpid"),
            content: row.get("content"),
            tags: row.get("tags"),
            params: row.get("params"),
            abstract_text: row.get("abstract"),
            language: row.get("language"),
            starttime: row.get("starttime"),
            endtime: row.get("endtime"),
            fe_group: row.get("fe_group"),
            orig_uid: row.get("orig_uid"),
            orig_pid: row.get("orig_pid"),
            sortdate: row.get("sortdate"),
            hash: row.get("hash"),
            directory: row.get("directory"),
            hidden_content: row.get("hidden_content"),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::create_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> IndexStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();
        IndexStore::new(pool)
    }

    fn page(orig_uid: i64) -> IndexRecord {
        let mut record = IndexRecord::new(5, "Home", "page", "1", "welcome");
        record.orig_uid = orig_uid;
        record
    }

    #[tokio::test]
    async fn insert_then_find_by_natural_key() {
        let store = store().await;
        let uid = store.insert(&page(7), 100).await.unwrap();

        let found = store.find_by_natural_key(&page(7)).await.unwrap().unwrap();
        assert_eq!(found.uid, uid);
        assert_eq!(found.crdate, 100);
        assert_eq!(found.record.content, "welcome");
        assert!(store.find_by_natural_key(&page(8)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_keeps_crdate() {
        let store = store().await;
        let uid = store.insert(&page(7), 100).await.unwrap();
        let mut changed = page(7);
        changed.content = "changed".into();
        store.update(uid, &changed, 200).await.unwrap();

        let row = store.get(uid).await.unwrap().unwrap();
        assert_eq!(row.crdate, 100);
        assert_eq!(row.tstamp, 200);
        assert_eq!(row.record.content, "changed");
    }

    #[tokio::test]
    async fn file_identity_includes_sortdate() {
        let store = store().await;
        let mut file = IndexRecord::new(5, "a.txt", "file:txt", "1", "hello");
        file.hash = "abc".into();
        file.sortdate = 10;
        file.language = -1;
        store.insert(&file, 100).await.unwrap();

        assert!(store
            .find_file_record("file:txt", "abc", 5, 10, -1)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_file_record("file:txt", "abc", 5, 11, -1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn additional_columns_are_added_once() {
        let store = store().await;
        let fields = vec![
            AdditionalField::text("mycolumn"),
            AdditionalField::int("orig_pid"),
        ];
        let added = store.ensure_columns(&fields).await.unwrap();
        assert_eq!(added, vec!["mycolumn".to_string()]);
        assert!(store.ensure_columns(&fields).await.unwrap().is_empty());

        let mut record = page(1);
        record
            .extra
            .insert("mycolumn".into(), FieldValue::Text("x".into()));
        let uid = store.insert(&record, 1).await.unwrap();
        let value: String = sqlx::query_scalar("SELECT mycolumn FROM index_records WHERE uid = ?")
            .bind(uid)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(value, "x");
    }

    #[tokio::test]
    async fn invalid_column_name_is_rejected() {
        let store = store().await;
        let fields = vec![AdditionalField::text("bad name;")];
        assert!(store.ensure_columns(&fields).await.is_err());
    }

    #[tokio::test]
    async fn delete_older_than_cutoff() {
        let store = store().await;
        store.insert(&page(1), 100).await.unwrap();
        store.insert(&page(2), 300).await.unwrap();

        assert_eq!(store.count_older_than(200).await.unwrap(), 1);
        assert_eq!(store.delete_older_than(200).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
