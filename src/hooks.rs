//! Extension points.
//!
//! Every hook kind is a list of trait objects registered once at startup and
//! invoked in registration order. Hooks receive the [`RunContext`] read-only,
//! except custom indexers which store records through it.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::JobConfig;
use crate::context::RunContext;
use crate::models::{FieldValue, IndexRecord};

/// An extra index column declared by an [`AdditionalFieldsHook`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdditionalField {
    pub name: String,
    pub default: FieldValue,
}

impl AdditionalField {
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: FieldValue::Text(String::new()),
        }
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: FieldValue::Int(0),
        }
    }

    pub fn with_default(name: impl Into<String>, default: FieldValue) -> Self {
        Self {
            name: name.into(),
            default,
        }
    }
}

/// Declares extra index columns. Called once per run before any job.
pub trait AdditionalFieldsHook: Send + Sync {
    fn additional_fields(&self) -> Vec<AdditionalField>;
}

/// Last chance to change a record before it is written.
pub trait ModifyFieldValuesHook: Send + Sync {
    fn modify_field_values(&self, record: &mut IndexRecord, ctx: &RunContext);
}

/// Adjusts the record built for a single file, content included.
pub trait ModifyFileIndexEntryHook: Send + Sync {
    fn modify_file_index_entry(&self, file: &Path, record: &mut IndexRecord, ctx: &RunContext);
}

/// Custom deletion logic run during full-mode cleanup, before rows older
/// than `cutoff` are removed. The returned text is added to the report.
#[async_trait]
pub trait CleanupHook: Send + Sync {
    async fn cleanup(&self, cutoff: i64, ctx: &RunContext) -> Result<String>;
}

/// Handles jobs itself. Called for every job; implementations decide from
/// the job type whether there is anything to do and return an empty
/// message otherwise.
#[async_trait]
pub trait CustomIndexer: Send + Sync {
    fn name(&self) -> &str;

    fn supports_incremental(&self) -> bool {
        false
    }

    async fn custom_indexing(&self, job: &JobConfig, ctx: &mut RunContext) -> Result<String>;

    async fn start_incremental_indexing(&self, job: &JobConfig, ctx: &mut RunContext) -> Result<String> {
        self.custom_indexing(job, ctx).await
    }
}

#[derive(Clone, Default)]
pub struct Hooks {
    additional_fields: Vec<Arc<dyn AdditionalFieldsHook>>,
    modify_field_values: Vec<Arc<dyn ModifyFieldValuesHook>>,
    modify_file_index_entry: Vec<Arc<dyn ModifyFileIndexEntryHook>>,
    cleanup: Vec<Arc<dyn CleanupHook>>,
    custom_indexers: Vec<Arc<dyn CustomIndexer>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_additional_fields(mut self, hook: Arc<dyn AdditionalFieldsHook>) -> Self {
        self.additional_fields.push(hook);
        self
    }

    pub fn on_modify_field_values(mut self, hook: Arc<dyn ModifyFieldValuesHook>) -> Self {
        self.modify_field_values.push(hook);
        self
    }

    pub fn on_modify_file_index_entry(mut self, hook: Arc<dyn ModifyFileIndexEntryHook>) -> Self {
        self.modify_file_index_entry.push(hook);
        self
    }

    pub fn on_cleanup(mut self, hook: Arc<dyn CleanupHook>) -> Self {
        self.cleanup.push(hook);
        self
    }

    pub fn with_custom_indexer(mut self, indexer: Arc<dyn CustomIndexer>) -> Self {
        self.custom_indexers.push(indexer);
        self
    }

    pub fn additional_fields(&self) -> &[Arc<dyn AdditionalFieldsHook>] {
        &self.additional_fields
    }

    pub fn modify_field_values(&self) -> &[Arc<dyn ModifyFieldValuesHook>] {
        &self.modify_field_values
    }

    pub fn modify_file_index_entry(&self) -> &[Arc<dyn ModifyFileIndexEntryHook>] {
        &self.modify_file_index_entry
    }

    pub fn cleanup(&self) -> &[Arc<dyn CleanupHook>] {
        &self.cleanup
    }

    pub fn custom_indexers(&self) -> &[Arc<dyn CustomIndexer>] {
        &self.custom_indexers
    }

    /// All registered additional fields, first declaration of a name wins.
    pub fn collect_additional_fields(&self) -> Vec<AdditionalField> {
        let mut fields: Vec<AdditionalField> = Vec::new();
        for hook in &self.additional_fields {
            for field in hook.additional_fields() {
                if !fields.iter().any(|f| f.name == field.name) {
                    fields.push(field);
                }
            }
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fields(Vec<AdditionalField>);

    impl AdditionalFieldsHook for Fields {
        fn additional_fields(&self) -> Vec<AdditionalField> {
            self.0.clone()
        }
    }

    #[test]
    fn first_declaration_of_a_field_wins() {
        let hooks = Hooks::new()
            .on_additional_fields(Arc::new(Fields(vec![
                AdditionalField::text("author"),
                AdditionalField::int("rating"),
            ])))
            .on_additional_fields(Arc::new(Fields(vec![AdditionalField::with_default(
                "author",
                FieldValue::Text("anonymous".into()),
            )])));

        let fields = hooks.collect_additional_fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0], AdditionalField::text("author"));
        assert_eq!(fields[1].default, FieldValue::Int(0));
    }
}
