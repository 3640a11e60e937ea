//! Read access to the host platform tables the indexers draw from: the page
//! tree, filter options, system categories, managed file metadata, file
//! references and file collections.

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::models::{FilterOption, PageRecord};

/// Which children `page_children` returns.
#[derive(Debug, Clone, Default)]
pub struct PageTreeFilter {
    pub include_deleted: bool,
    /// Skip pages flagged `no_search`.
    pub searchable_only: bool,
    /// Skip children of these parents.
    pub exclude_parents: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub uid: i64,
    pub title: String,
}

/// Metadata row of a file inside a managed storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileRow {
    pub uid: i64,
    pub storage: i64,
    /// Path inside the storage, starting with `/`.
    pub identifier: String,
    pub title: String,
    pub description: String,
    pub alternative: String,
    pub language: String,
    pub fe_groups: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReference {
    pub uid: i64,
    pub file: i64,
    pub sorting_foreign: i64,
}

#[derive(Clone)]
pub struct HostStore {
    pool: SqlitePool,
}

const PAGE_COLUMNS: &str = "uid, pid, title, abstract, bodytext, sys_language_uid, starttime, endtime, \
     fe_group, facet_options, t3ver_state, t3ver_wsid, tstamp";

const FILTER_OPTION_COLUMNS: &str =
    "uid, title, tag, sys_language_uid, automated_tagging, automated_tagging_exclude";

const FILE_COLUMNS: &str =
    "uid, storage, identifier, title, description, alternative, language, fe_groups";

impl HostStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Default-language children of `pid`, ordered by uid.
    pub async fn page_children(&self, pid: i64, filter: &PageTreeFilter) -> Result<Vec<i64>, sqlx::Error> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT uid FROM pages WHERE sys_language_uid = 0 AND pid = ");
        qb.push_bind(pid);
        if !filter.include_deleted {
            qb.push(" AND deleted = 0");
        }
        if filter.searchable_only {
            qb.push(" AND no_search <> 1");
        }
        if !filter.exclude_parents.is_empty() {
            qb.push(" AND pid NOT IN (");
            let mut ids = qb.separated(", ");
            for id in &filter.exclude_parents {
                ids.push_bind(*id);
            }
            ids.push_unseparated(")");
        }
        qb.push(" ORDER BY uid");
        qb.build_query_scalar::<i64>()
            .fetch_all(&self.pool)
            .await
    }

    /// Pages among `ids` that are not hidden, deleted or excluded from search.
    pub async fn searchable_pages(&self, ids: &[i64]) -> Result<Vec<PageRecord>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM pages WHERE no_search = 0 AND hidden = 0 AND deleted = 0 AND uid IN (",
            PAGE_COLUMNS
        ));
        push_id_list(&mut qb, ids);
        qb.push(" ORDER BY uid");
        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(page_record).collect())
    }

    /// Visible filter options among `uids`.
    pub async fn filter_options(&self, uids: &[i64]) -> Result<Vec<FilterOption>, sqlx::Error> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM filter_options WHERE hidden = 0 AND deleted = 0 AND uid IN (",
            FILTER_OPTION_COLUMNS
        ));
        push_id_list(&mut qb, uids);
        qb.push(" ORDER BY uid");
        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(filter_option).collect())
    }

    /// Visible filter options carrying one of `tags` in the given language.
    pub async fn filter_options_by_tags(
        &self,
        tags: &[String],
        language: i64,
    ) -> Result<Vec<FilterOption>, sqlx::Error> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM filter_options WHERE hidden = 0 AND deleted = 0 AND sys_language_uid = ",
            FILTER_OPTION_COLUMNS
        ));
        qb.push_bind(language);
        qb.push(" AND tag IN (");
        let mut list = qb.separated(", ");
        for tag in tags {
            list.push_bind(tag.as_str());
        }
        list.push_unseparated(")");
        qb.push(" ORDER BY uid");
        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(filter_option).collect())
    }

    /// Visible filter options with automated tagging rules.
    pub async fn automated_tagging_options(&self) -> Result<Vec<FilterOption>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM filter_options WHERE hidden = 0 AND deleted = 0 AND automated_tagging <> '' ORDER BY uid",
            FILTER_OPTION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(filter_option).collect())
    }

    /// Visible system categories assigned to a record, in assignment order.
    pub async fn categories_for(&self, table: &str, record: i64) -> Result<Vec<Category>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT c.uid, c.title
            FROM categories c
            JOIN category_relations r ON r.category = c.uid
            WHERE r.tablename = ? AND r.record = ? AND c.hidden = 0 AND c.deleted = 0
            ORDER BY r.sorting, c.uid
            "#,
        )
        .bind(table)
        .bind(record)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| Category {
                uid: row.get("uid"),
                title: row.get("title"),
            })
            .collect())
    }

    pub async fn file(&self, uid: i64) -> Result<Option<FileRow>, sqlx::Error> {
        let row = sqlx::query(&format!("SELECT {} FROM files WHERE uid = ?", FILE_COLUMNS))
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(file_row))
    }

    /// Metadata row for a file in a storage, created empty if missing.
    pub async fn ensure_file(&self, storage: i64, identifier: &str) -> Result<FileRow, sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO files (storage, identifier) VALUES (?, ?)")
            .bind(storage)
            .bind(identifier)
            .execute(&self.pool)
            .await?;
        let row = sqlx::query(&format!(
            "SELECT {} FROM files WHERE storage = ? AND identifier = ?",
            FILE_COLUMNS
        ))
        .bind(storage)
        .bind(identifier)
        .fetch_one(&self.pool)
        .await?;
        Ok(file_row(&row))
    }

    /// Files attached to `table.field` of a record, in attachment order.
    pub async fn file_references(
        &self,
        table: &str,
        field: &str,
        record: i64,
        language: i64,
    ) -> Result<Vec<FileReference>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT uid, file, sorting_foreign
            FROM file_references
            WHERE tablenames = ? AND fieldname = ? AND uid_foreign = ? AND sys_language_uid = ?
            ORDER BY sorting_foreign, uid
            "#,
        )
        .bind(table)
        .bind(field)
        .bind(record)
        .bind(language)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| FileReference {
                uid: row.get("uid"),
                file: row.get("file"),
                sorting_foreign: row.get("sorting_foreign"),
            })
            .collect())
    }

    /// File uids of a static file collection, in collection order.
    pub async fn collection_files(&self, collection: i64) -> Result<Vec<i64>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT file FROM file_collection_items WHERE collection = ? ORDER BY sorting, file",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
    }
}

fn push_id_list(qb: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
    let mut list = qb.separated(", ");
    for id in ids {
        list.push_bind(*id);
    }
    list.push_unseparated(")");
}

fn page_record(row: &SqliteRow) -> PageRecord {
    PageRecord {
        uid: row.get("uid"),
        pid: row.get("pid"),
        title: row.get("title"),
        abstract_text: row.get("abstract"),
        bodytext: row.get("bodytext"),
        sys_language_uid: row.get("sys_language_uid"),
        starttime: row.get("starttime"),
        endtime: row.get("endtime"),
        fe_group: row.get("fe_group"),
        facet_options: row.get("facet_options"),
        t3ver_state: row.get("t3ver_state"),
        t3ver_wsid: row.get("t3ver_wsid"),
        tstamp: row.get("tstamp"),
        tags: String::new(),
    }
}

fn filter_option(row: &SqliteRow) -> FilterOption {
    FilterOption {
        uid: row.get("uid"),
        title: row.get("title"),
        tag: row.get("tag"),
        sys_language_uid: row.get("sys_language_uid"),
        automated_tagging: row.get("automated_tagging"),
        automated_tagging_exclude: row.get("automated_tagging_exclude"),
    }
}

fn file_row(row: &SqliteRow) -> FileRow {
    FileRow {
        uid: row.get("uid"),
        storage: row.get("storage"),
        identifier: row.get("identifier"),
        title: row.get("title"),
        description: row.get("description"),
        alternative: row.get("alternative"),
        language: row.get("language"),
        fe_groups: row.get("fe_groups"),
    }
}
