use bson::doc;
use serde::Deserialize;

use crate::{compression::Compressor, conn::Command};

/// The batching bound applied when the server's `hello` reply omits
/// `maxWriteBatchSize`.
pub(crate) const DEFAULT_MAX_WRITE_BATCH_SIZE: usize = 1000;

/// The oldest wire version this driver speaks: MongoDB 5.1, the first release whose
/// `hello`-based handshake and command set this driver targets.
pub(crate) const MIN_SUPPORTED_WIRE_VERSION: i32 = 14;

/// Construct the `hello` handshake command. The `compression` field is only advertised
/// when the connection string requested compressors; otherwise it is omitted entirely and
/// the server will not negotiate compression for the session.
pub(crate) fn hello_command(db: &str, compressors: Option<&[Compressor]>) -> Command {
    let mut body = doc! { "hello": 1 };

    if let Some(compressors) = compressors {
        if !compressors.is_empty() {
            let names: Vec<&str> = compressors.iter().map(Compressor::name).collect();
            body.insert("compression", names);
        }
    }

    Command::new(db, body)
}

/// The subset of the reply to a `hello` command that the connection consumes.
///
/// See the documentation [here](https://www.mongodb.com/docs/manual/reference/command/hello/)
/// for more details.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HelloCommandResponse {
    /// The maximum number of write operations permitted in a write batch.
    pub(crate) max_write_batch_size: Option<i64>,

    /// The latest wire protocol version the server supports.
    pub(crate) max_wire_version: Option<i32>,

    /// The list of compressors, of those advertised, that the server also supports;
    /// absent when the handshake did not advertise any.
    pub(crate) compression: Option<Vec<String>>,
}

impl HelloCommandResponse {
    pub(crate) fn max_write_batch_size(&self) -> usize {
        self.max_write_batch_size
            .and_then(|size| usize::try_from(size).ok())
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_MAX_WRITE_BATCH_SIZE)
    }
}
