//! Contains the types of results returned by CRUD operations.

use bson::Document;
use serde::Deserialize;

/// The result of a [`Collection::delete`](crate::Collection::delete) operation.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DeleteResult {
    /// The number of documents deleted.
    #[serde(default)]
    pub n: u64,

    /// Per-statement errors, if any occurred.
    #[serde(default)]
    pub write_errors: Vec<Document>,

    /// The write concern error, if one occurred.
    #[serde(default)]
    pub write_concern_error: Option<Document>,
}

/// The result of a [`Collection::insert_many`](crate::Collection::insert_many) or
/// [`Collection::insert_one`](crate::Collection::insert_one) operation.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct InsertManyResult {
    /// The number of documents inserted.
    #[serde(rename = "n", default)]
    pub inserted_count: u64,

    /// Per-document errors, if any occurred.
    #[serde(default)]
    pub write_errors: Vec<Document>,
}
