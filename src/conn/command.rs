use bson::{Bson, Document};

use super::wire::DocumentSequence;
use crate::error::{ErrorKind, Result};

/// `Command` is a driver side abstraction of a server command containing all the
/// information necessary to serialize it to a wire message.
#[derive(Debug, Clone)]
pub(crate) struct Command {
    pub(crate) target_db: String,
    pub(crate) body: Document,
    pub(crate) document_sequence: Option<DocumentSequence>,
}

impl Command {
    /// Constructs a new command. `target_db` is used for `$db` unless the body already
    /// carries one.
    pub(crate) fn new(target_db: impl Into<String>, body: Document) -> Self {
        Self {
            target_db: target_db.into(),
            body,
            document_sequence: None,
        }
    }

    /// Constructs a command whose `identifier` field (a homogeneous array of documents,
    /// e.g. `insert.documents`) is removed from the body and sent as a document sequence
    /// instead. A wire-level optimization with no semantic difference from embedding the
    /// array in the body.
    pub(crate) fn new_sequenced(
        target_db: impl Into<String>,
        body: Document,
        identifier: &str,
    ) -> Result<Self> {
        let mut command = Self::new(target_db, body);
        command.extract_sequence(identifier)?;
        Ok(command)
    }

    fn extract_sequence(&mut self, identifier: &str) -> Result<()> {
        let documents = match self.body.remove(identifier) {
            Some(Bson::Array(elements)) => elements
                .into_iter()
                .map(|element| match element {
                    Bson::Document(document) => Ok(document),
                    other => Err(ErrorKind::InvalidArgument {
                        message: format!(
                            "document sequence field {:?} contains a non-document element: {}",
                            identifier, other
                        ),
                    }
                    .into()),
                })
                .collect::<Result<Vec<Document>>>()?,
            Some(other) => {
                return Err(ErrorKind::InvalidArgument {
                    message: format!(
                        "document sequence field {:?} must be an array, got: {}",
                        identifier, other
                    ),
                }
                .into());
            }
            None => {
                return Err(ErrorKind::InvalidArgument {
                    message: format!("command has no field {:?} to send as a document sequence", identifier),
                }
                .into());
            }
        };

        self.document_sequence = Some(DocumentSequence {
            identifier: identifier.to_string(),
            documents,
        });
        Ok(())
    }
}
