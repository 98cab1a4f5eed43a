//! Options for the collection operations.

use bson::Document;
use typed_builder::TypedBuilder;

/// Specifies the options to a [`Collection::find`](crate::Collection::find) operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
#[non_exhaustive]
pub struct FindOptions {
    /// The number of matching documents to skip before returning results.
    pub skip: Option<u64>,

    /// The maximum number of documents to return; 0 (the default) means no limit.
    pub limit: Option<i64>,

    /// The inclusive lower bound for a specific index.
    pub min: Option<Document>,

    /// The exclusive upper bound for a specific index.
    pub max: Option<Document>,
}

/// Specifies the options to a [`Collection::delete`](crate::Collection::delete) operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
#[non_exhaustive]
pub struct DeleteOptions {
    /// The number of matching documents to delete: 0 (the default) deletes all matching
    /// documents, 1 deletes a single document.
    pub limit: Option<u32>,

    /// Whether the server should stop at the first error. Defaults to true.
    pub ordered: Option<bool>,
}

/// Specifies the options to a [`Collection::rename`](crate::Collection::rename) operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
#[non_exhaustive]
pub struct RenameOptions {
    /// The database to move the collection to. Defaults to the collection's own
    /// database.
    pub new_db: Option<String>,

    /// Whether an existing collection with the target name should be dropped. When false
    /// (the default) the rename fails instead.
    pub drop_target: Option<bool>,
}
