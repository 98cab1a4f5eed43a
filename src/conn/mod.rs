//! The connection: one socket, one background reader, any number of concurrent callers.

mod command;
pub(crate) mod wire;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
        Mutex as SyncMutex,
        OnceLock,
        RwLock,
        Weak,
    },
};

use bson::Document;
use tokio::{
    io::AsyncWriteExt,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

pub(crate) use self::command::Command;
use self::wire::{next_request_id, Header, Message, OpCode};
use crate::{
    bson_util,
    coll::Collection,
    compression::Compressor,
    error::{CommandError, Error, ErrorKind, Result},
    hello::{
        hello_command,
        HelloCommandResponse,
        DEFAULT_MAX_WRITE_BATCH_SIZE,
        MIN_SUPPORTED_WIRE_VERSION,
    },
    options::{ConnectionString, DEFAULT_PORT},
};

/// A single connection to a MongoDB server.
///
/// A `Connection` multiplexes concurrent callers over one TCP socket: each command is
/// tagged with a random request id, and a background task routes every reply to the
/// caller whose request it answers, regardless of arrival order. Cloning is cheap and
/// produces another handle to the same connection.
///
/// The connection must be [`open`](Connection::open)ed before use. Errors the server
/// returns to individual commands leave the connection healthy; protocol violations and
/// I/O errors are fatal to the connection as a whole and are delivered to every caller
/// with a command in flight.
#[derive(Clone, Debug)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

#[derive(Debug)]
struct ConnectionInner {
    options: ConnectionString,
    default_db: RwLock<Option<String>>,
    core: RwLock<Option<Arc<Core>>>,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if let Ok(mut core) = self.core.write() {
            if let Some(core) = core.take() {
                core.shutdown(&Error::from(ErrorKind::Shutdown));
            }
        }
    }
}

/// The live half of an open connection.
#[derive(Debug)]
struct Core {
    write_half: Mutex<OwnedWriteHalf>,
    waiters: SyncMutex<HashMap<i32, oneshot::Sender<Result<Document>>>>,
    session: OnceLock<Session>,
    poisoned: AtomicBool,
    reader: SyncMutex<Option<JoinHandle<()>>>,
}

/// Per-session state distilled from the `hello` handshake reply.
#[derive(Debug)]
struct Session {
    max_write_batch_size: usize,
    compressor: Option<Compressor>,
}

impl Connection {
    /// Creates a new unopened connection from a connection string of the form
    /// `mongodb://host[:port][/defaultDb][?compressors=zstd,zlib]`.
    pub fn new(uri: impl AsRef<str>) -> Result<Self> {
        Ok(Self::with_options(ConnectionString::parse(uri)?))
    }

    /// Creates a new unopened connection from parsed options.
    pub fn with_options(options: ConnectionString) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                default_db: RwLock::new(options.default_database.clone()),
                options,
                core: RwLock::new(None),
            }),
        }
    }

    /// Opens the connection: establishes the TCP stream, starts the background reader,
    /// and performs the `hello` handshake. The handshake itself is always uncompressed;
    /// if the connection string requested compressors and the server supports one of
    /// them, subsequent messages are compressed with the negotiated algorithm.
    pub async fn open(&self) -> Result<()> {
        if self.inner.core.read().unwrap().is_some() {
            return Err(Error::invalid_argument("connection is already open"));
        }

        let options = &self.inner.options;
        if let Some(ref compressors) = options.compressors {
            for compressor in compressors {
                compressor.validate()?;
            }
        }

        let address = &options.host;
        debug!(%address, "connecting");
        let stream =
            TcpStream::connect((address.host(), address.port().unwrap_or(DEFAULT_PORT))).await?;
        let (read_half, write_half) = stream.into_split();

        let core = Arc::new(Core {
            write_half: Mutex::new(write_half),
            waiters: SyncMutex::new(HashMap::new()),
            session: OnceLock::new(),
            poisoned: AtomicBool::new(false),
            reader: SyncMutex::new(None),
        });
        let reader = tokio::spawn(read_loop(read_half, Arc::downgrade(&core)));
        *core.reader.lock().unwrap() = Some(reader);

        let hello = hello_command(&self.target_db(), options.compressors.as_deref());
        let session = match self.handshake(&core, hello).await {
            Ok(session) => session,
            Err(error) => {
                core.shutdown(&error);
                return Err(error);
            }
        };

        debug!(
            max_write_batch_size = session.max_write_batch_size,
            compressor = session.compressor.as_ref().map(Compressor::name),
            "handshake complete"
        );
        let _ = core.session.set(session);

        let mut installed = self.inner.core.write().unwrap();
        if installed.is_some() {
            core.shutdown(&Error::from(ErrorKind::Shutdown));
            return Err(Error::invalid_argument("connection is already open"));
        }
        *installed = Some(core);
        Ok(())
    }

    async fn handshake(&self, core: &Arc<Core>, hello: Command) -> Result<Session> {
        let reply = self.run_with_core(core, hello).await?;
        let response: HelloCommandResponse = bson::from_document(reply)?;

        if let Some(max_wire_version) = response.max_wire_version {
            if max_wire_version < MIN_SUPPORTED_WIRE_VERSION {
                return Err(ErrorKind::IncompatibleServer {
                    message: format!(
                        "the server speaks wire versions up to {}, but at least {} (MongoDB \
                         5.1) is required",
                        max_wire_version, MIN_SUPPORTED_WIRE_VERSION
                    ),
                }
                .into());
            }
        }

        let compressor = match (&self.inner.options.compressors, &response.compression) {
            (Some(requested), Some(supported)) => Compressor::negotiate(requested, supported),
            _ => None,
        };

        Ok(Session {
            max_write_batch_size: response.max_write_batch_size(),
            compressor,
        })
    }

    #[cfg(test)]
    pub(crate) fn negotiated_compressor(&self) -> Option<Compressor> {
        self.core()
            .ok()
            .and_then(|core| core.session.get().and_then(|s| s.compressor.clone()))
    }

    /// Closes the connection: the background reader stops, and every caller still
    /// awaiting a reply receives [`ErrorKind::Shutdown`]. The connection returns to the
    /// unopened state and may be opened again.
    pub fn close(&self) {
        let core = self.inner.core.write().unwrap().take();
        if let Some(core) = core {
            core.shutdown(&Error::from(ErrorKind::Shutdown));
        }
    }

    /// Changes the database that unqualified operations target.
    pub fn use_database(&self, database: impl Into<String>) {
        *self.inner.default_db.write().unwrap() = Some(database.into());
    }

    /// The database that unqualified operations target, from the connection string's path
    /// or the latest [`use_database`](Connection::use_database) call.
    pub fn default_database(&self) -> Option<String> {
        self.inner.default_db.read().unwrap().clone()
    }

    /// Gets a handle to the named collection in the current default database.
    pub fn collection(&self, name: impl Into<String>) -> Collection {
        Collection::new(self.clone(), self.target_db(), name)
    }

    /// Runs a command against the current default database (or `admin` when the
    /// connection string named none) and returns the server's reply. A `$db` field in
    /// `body` overrides the target database.
    ///
    /// Replies with `ok != 1` are returned as [`ErrorKind::Command`] errors carrying the
    /// full error document; the connection remains usable after them.
    pub async fn run_command(&self, body: Document) -> Result<Document> {
        self.run(Command::new(self.target_db(), body)).await
    }

    /// Like [`run_command`](Connection::run_command), but `identifier` names a field of
    /// `body` holding a homogeneous array of documents (e.g. `documents` for `insert`)
    /// which is sent as a wire-level document sequence instead of inside the command
    /// body. The server observes no semantic difference.
    pub async fn run_command_sequenced(
        &self,
        body: Document,
        identifier: &str,
    ) -> Result<Document> {
        self.run(Command::new_sequenced(self.target_db(), body, identifier)?)
            .await
    }

    pub(crate) async fn run(&self, command: Command) -> Result<Document> {
        let core = self.core()?;
        self.run_with_core(&core, command).await
    }

    fn core(&self) -> Result<Arc<Core>> {
        self.inner
            .core
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| ErrorKind::NotReady.into())
    }

    fn target_db(&self) -> String {
        self.default_database()
            .unwrap_or_else(|| "admin".to_string())
    }

    /// Sends a command and awaits its reply. The waiter is registered under the request
    /// id before the first byte reaches the socket, so the reader cannot race it.
    async fn run_with_core(&self, core: &Arc<Core>, command: Command) -> Result<Document> {
        let message = Message::with_command(command);
        let request_id = next_request_id();

        let (sender, receiver) = oneshot::channel();
        if let Some(previous) = core.waiters.lock().unwrap().insert(request_id, sender) {
            // Random ids are not checked for collisions; the older waiter loses.
            let _ = previous.send(Err(Error::internal(format!(
                "request id collision: {request_id}"
            ))));
        }
        let _guard = WaiterGuard {
            core: core.as_ref(),
            request_id,
        };

        self.send_message(core, request_id, &message).await?;

        let reply = receiver
            .await
            .map_err(|_| Error::from(ErrorKind::Shutdown))??;

        match reply.get("ok").and_then(bson_util::get_int) {
            Some(1) => Ok(reply),
            _ => Err(ErrorKind::Command(CommandError::from_reply(reply)).into()),
        }
    }

    /// Encodes a message, compresses it off the reactor when the session negotiated a
    /// compressor, and writes it out under the write-half lock.
    async fn send_message(&self, core: &Core, request_id: i32, message: &Message) -> Result<()> {
        let session = core.session.get();
        let max_batch = session.map_or(DEFAULT_MAX_WRITE_BATCH_SIZE, |s| s.max_write_batch_size);

        let payload = message.encode_payload(max_batch)?;
        let (op_code, payload) = match session.and_then(|s| s.compressor.clone()) {
            Some(compressor) => (
                OpCode::Compressed,
                compress_message(compressor, payload).await?,
            ),
            None => (OpCode::Message, payload),
        };

        let header = Header {
            length: i32::try_from(Header::LENGTH + payload.len()).map_err(|_| {
                Error::invalid_argument("message exceeds the wire protocol size limit")
            })?,
            request_id,
            response_to: 0,
            op_code,
        };

        if core.poisoned.load(Ordering::SeqCst) {
            return Err(ErrorKind::Shutdown.into());
        }

        trace!(
            request_id,
            op_code = header.op_code as i32,
            length = header.length,
            "sending command"
        );

        let mut write_half = core.write_half.lock().await;
        if core.poisoned.load(Ordering::SeqCst) {
            return Err(ErrorKind::Shutdown.into());
        }

        // If this future is dropped (or errors) between here and `disarm`, the frame
        // boundary on the socket is lost and the connection cannot be reused.
        let mut guard = PoisonGuard { core, armed: true };
        header.write_to(&mut *write_half).await?;
        write_half.write_all(&payload).await?;
        write_half.flush().await?;
        guard.armed = false;

        Ok(())
    }
}

impl Core {
    /// Marks the connection unusable and fails every pending waiter with `error`.
    fn poison(&self, error: &Error) {
        self.poisoned.store(true, Ordering::SeqCst);
        let waiters: Vec<_> = {
            let mut waiters = self.waiters.lock().unwrap();
            waiters.drain().collect()
        };
        for (request_id, waiter) in waiters {
            trace!(request_id, "failing pending waiter");
            let _ = waiter.send(Err(error.clone()));
        }
    }

    /// `poison`, plus stops the background reader.
    fn shutdown(&self, error: &Error) {
        self.poison(error);
        if let Some(reader) = self.reader.lock().unwrap().take() {
            reader.abort();
        }
    }
}

/// Removes a pending waiter when its registering caller goes away. Completed waiters have
/// already been removed by the reader, making this a no-op; for a cancelled caller it
/// ensures a late reply is dropped instead of completing a dead entry.
struct WaiterGuard<'a> {
    core: &'a Core,
    request_id: i32,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut waiters) = self.core.waiters.lock() {
            waiters.remove(&self.request_id);
        }
    }
}

/// Shuts the connection down if a send is abandoned mid-frame.
struct PoisonGuard<'a> {
    core: &'a Core,
    armed: bool,
}

impl Drop for PoisonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("command write interrupted mid-frame; closing the connection");
            self.core.shutdown(&Error::from(ErrorKind::Shutdown));
        }
    }
}

/// The background reader: reads one reply at a time and completes the waiter whose
/// request id it answers. Replies that match no waiter are dropped. Any read or decode
/// error is fatal: every pending waiter fails with it and the task exits.
async fn read_loop(mut reader: OwnedReadHalf, core: Weak<Core>) {
    let error = loop {
        match Message::read_from(&mut reader).await {
            Ok(message) => {
                let Some(core) = core.upgrade() else {
                    return;
                };
                trace!(response_to = message.response_to, "routing server reply");
                let waiter = core.waiters.lock().unwrap().remove(&message.response_to);
                match waiter {
                    // A failed send means the caller was cancelled; drop the reply.
                    Some(waiter) => {
                        let _ = waiter.send(Ok(message.body));
                    }
                    None => warn!(
                        response_to = message.response_to,
                        "dropping reply with no matching waiter"
                    ),
                }
            }
            Err(error) => break error,
        }
    };

    if let Some(core) = core.upgrade() {
        debug!(%error, "connection reader terminated");
        core.poison(&error);
    }
}

/// Wraps an encoded OP_MSG payload in an OP_COMPRESSED envelope, compressing on the
/// blocking pool.
async fn compress_message(compressor: Compressor, payload: Vec<u8>) -> Result<Vec<u8>> {
    let uncompressed_size = payload.len();
    let compressor_id = compressor.id();

    let compressed = tokio::task::spawn_blocking(move || compressor.compress(&payload))
        .await
        .map_err(|error| Error::internal(format!("compression task failed: {error}")))??;

    Message::encode_compressed(
        OpCode::Message,
        uncompressed_size,
        compressor_id,
        &compressed,
    )
}
