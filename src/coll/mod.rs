pub(crate) mod options;

use std::{fmt, str::FromStr};

use bson::{doc, Document};
use serde::{Deserialize, Deserializer};

use crate::{
    conn::{Command, Connection},
    cursor::Cursor,
    error::{Error, Result},
    options::{DeleteOptions, FindOptions, RenameOptions},
    results::{DeleteResult, InsertManyResult},
};

/// A MongoDB collection, bound to the database that was current when it was created.
///
/// `Collection` is a thin façade: each method maps to one MongoDB command document and
/// one round trip on the underlying [`Connection`]. Instances are cheap to clone.
#[derive(Clone, Debug)]
pub struct Collection {
    connection: Connection,
    db: String,
    name: String,
}

impl Collection {
    pub(crate) fn new(connection: Connection, db: String, name: impl Into<String>) -> Self {
        Self {
            connection,
            db,
            name: name.into(),
        }
    }

    /// The name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The namespace of this collection.
    pub fn namespace(&self) -> Namespace {
        Namespace {
            db: self.db.clone(),
            coll: self.name.clone(),
        }
    }

    /// Drops the collection, deleting all data and indexes in it.
    pub async fn drop(&self) -> Result<()> {
        self.connection
            .run(Command::new(self.db.clone(), doc! { "drop": &self.name }))
            .await?;
        Ok(())
    }

    /// Renames the collection. By default the collection stays in its database and an
    /// existing collection with the target name is an error; see [`RenameOptions`].
    pub async fn rename(
        &self,
        new_name: impl AsRef<str>,
        options: impl Into<Option<RenameOptions>>,
    ) -> Result<()> {
        let options = options.into().unwrap_or_default();
        let to_db = options.new_db.as_deref().unwrap_or(&self.db);

        let body = doc! {
            "renameCollection": format!("{}.{}", self.db, self.name),
            "to": format!("{}.{}", to_db, new_name.as_ref()),
            "dropTarget": options.drop_target.unwrap_or(false),
        };

        // renameCollection may only be issued against the admin database.
        self.connection.run(Command::new("admin", body)).await?;
        Ok(())
    }

    /// Deletes documents matching `query`. With the default options every matching
    /// document is deleted; a limit of 1 deletes at most one.
    pub async fn delete(
        &self,
        query: Document,
        options: impl Into<Option<DeleteOptions>>,
    ) -> Result<DeleteResult> {
        let options = options.into().unwrap_or_default();

        let body = doc! {
            "delete": &self.name,
            "deletes": [{ "q": query, "limit": options.limit.unwrap_or(0) as i32 }],
            "ordered": options.ordered.unwrap_or(true),
        };

        let reply = self.connection.run(Command::new(self.db.clone(), body)).await?;
        Ok(bson::from_document(reply)?)
    }

    /// Deletes at most one document matching `query`.
    pub async fn delete_one(&self, query: Document) -> Result<DeleteResult> {
        self.delete(query, DeleteOptions::builder().limit(1).build())
            .await
    }

    /// Inserts the given documents. The documents travel as a wire-level document
    /// sequence rather than inside the command body, split into sections that respect
    /// the server's `maxWriteBatchSize`.
    pub async fn insert_many(
        &self,
        documents: impl IntoIterator<Item = Document>,
    ) -> Result<InsertManyResult> {
        let documents: Vec<Document> = documents.into_iter().collect();
        if documents.is_empty() {
            return Err(Error::invalid_argument(
                "No documents provided to insert_many",
            ));
        }

        let body = doc! {
            "insert": &self.name,
            "documents": documents,
        };
        let command = Command::new_sequenced(self.db.clone(), body, "documents")?;

        let reply = self.connection.run(command).await?;
        Ok(bson::from_document(reply)?)
    }

    /// Inserts a single document.
    pub async fn insert_one(&self, document: Document) -> Result<InsertManyResult> {
        self.insert_many([document]).await
    }

    /// Selects documents matching `query` and returns a [`Cursor`] over them.
    pub async fn find(
        &self,
        query: Document,
        options: impl Into<Option<FindOptions>>,
    ) -> Result<Cursor> {
        let options = options.into().unwrap_or_default();

        let mut body = doc! {
            "find": &self.name,
            "filter": query,
            "limit": options.limit.unwrap_or(0),
        };
        if let Some(skip) = options.skip {
            let skip = i64::try_from(skip)
                .map_err(|_| Error::invalid_argument(format!("skip out of range: {skip}")))?;
            body.insert("skip", skip);
        }
        if let Some(min) = options.min {
            body.insert("min", min);
        }
        if let Some(max) = options.max {
            body.insert("max", max);
        }

        let reply = self.connection.run(Command::new(self.db.clone(), body)).await?;
        Cursor::new(self.connection.clone(), reply)
    }

    /// Selects a single document matching `query`, or `None` when nothing matches.
    pub async fn find_one(&self, query: Document) -> Result<Option<Document>> {
        let mut cursor = self
            .find(query, FindOptions::builder().limit(1).build())
            .await?;
        cursor.next().await
    }
}

/// A database–collection pair, written `db.coll` on the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Namespace {
    /// The database name.
    pub db: String,

    /// The collection name.
    pub coll: String,
}

impl Namespace {
    /// Creates a namespace from a database and collection name.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}.{}", self.db, self.coll)
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self {
                db: db.to_string(),
                coll: coll.to_string(),
            }),
            _ => Err(Error::invalid_response(format!(
                "namespace must be of the form <db>.<collection>, got {:?}",
                s
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for Namespace {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let namespace = String::deserialize(deserializer)?;
        namespace.parse().map_err(serde::de::Error::custom)
    }
}
