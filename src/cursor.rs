use std::{
    collections::VecDeque,
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use bson::{doc, Document};
use futures_core::Stream;
use serde::Deserialize;

use crate::{
    coll::Namespace,
    conn::{Command, Connection},
    error::Result,
    BoxFuture,
};

/// The shape of a reply carrying cursor data (`find`, `getMore`, `aggregate`).
#[derive(Debug, Deserialize)]
struct CursorBody {
    cursor: CursorInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorInfo {
    id: i64,
    ns: Namespace,
    #[serde(default)]
    first_batch: VecDeque<Document>,
    #[serde(default)]
    next_batch: VecDeque<Document>,
}

/// A cursor over the results of a query.
///
/// A cursor buffers the batch most recently returned by the server and requests the next
/// batch with `getMore` once it runs dry, until the server reports a cursor id of 0.
/// Documents can be pulled one at a time with [`next`](Cursor::next), or the cursor can
/// be consumed as a [`Stream`]:
///
/// ```rust,no_run
/// # use futures::TryStreamExt;
/// # use mongolite::{bson::doc, Connection, Result};
/// # async fn run(conn: Connection) -> Result<()> {
/// let mut cursor = conn.collection("people").find(doc! {}, None).await?;
/// while let Some(person) = cursor.try_next().await? {
///     println!("{person}");
/// }
/// # Ok(())
/// # }
/// ```
///
/// A cursor is a single consumer: interleaving concurrent reads on the same cursor is
/// not supported.
pub struct Cursor {
    connection: Connection,
    ns: Namespace,
    id: i64,
    buffer: VecDeque<Document>,
    in_flight: Option<BoxFuture<'static, Result<CursorInfo>>>,
}

impl Cursor {
    pub(crate) fn new(connection: Connection, reply: Document) -> Result<Self> {
        let body: CursorBody = bson::from_document(reply)?;
        Ok(Self {
            connection,
            ns: body.cursor.ns,
            id: body.cursor.id,
            buffer: body.cursor.first_batch,
            in_flight: None,
        })
    }

    /// The server-side id of this cursor; 0 once the server has no more documents.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// The namespace the cursor is reading from.
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// Whether all documents have been handed out.
    pub fn is_exhausted(&self) -> bool {
        self.id == 0 && self.buffer.is_empty()
    }

    /// Returns the next document, fetching another batch from the server when the
    /// buffered one is exhausted. Returns `Ok(None)` once the cursor is exhausted; the
    /// cursor stays exhausted from then on.
    pub async fn next(&mut self) -> Result<Option<Document>> {
        loop {
            // Finish a refill started by a `Stream` poll before anything else.
            if let Some(future) = self.in_flight.as_mut() {
                let result = future.as_mut().await;
                self.in_flight = None;
                self.absorb(result)?;
            }

            if let Some(document) = self.buffer.pop_front() {
                return Ok(Some(document));
            }
            if self.id == 0 {
                return Ok(None);
            }

            let result = get_more(self.connection.clone(), self.ns.clone(), self.id).await;
            self.absorb(result)?;
        }
    }

    /// Applies the outcome of a `getMore`. Errors leave the cursor exhausted.
    fn absorb(&mut self, result: Result<CursorInfo>) -> Result<()> {
        match result {
            Ok(info) => {
                self.id = info.id;
                self.buffer = info.next_batch;
                Ok(())
            }
            Err(error) => {
                self.id = 0;
                Err(error)
            }
        }
    }
}

impl Stream for Cursor {
    type Item = Result<Document>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(future) = this.in_flight.as_mut() {
                match future.as_mut().poll(cx) {
                    Poll::Ready(result) => {
                        this.in_flight = None;
                        if let Err(error) = this.absorb(result) {
                            return Poll::Ready(Some(Err(error)));
                        }
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            if let Some(document) = this.buffer.pop_front() {
                return Poll::Ready(Some(Ok(document)));
            }
            if this.id == 0 {
                return Poll::Ready(None);
            }

            let future = get_more(this.connection.clone(), this.ns.clone(), this.id);
            this.in_flight = Some(Box::pin(future));
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Cursor")
            .field("ns", &self.ns)
            .field("id", &self.id)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

async fn get_more(connection: Connection, ns: Namespace, id: i64) -> Result<CursorInfo> {
    // `collection` carries the full namespace string.
    let body = doc! { "getMore": id, "collection": ns.to_string() };
    let reply = connection.run(Command::new(ns.db, body)).await?;
    let body: CursorBody = bson::from_document(reply)?;
    Ok(body.cursor)
}
