use bitflags::bitflags;
use bson::{Bson, Document};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{
    header::{Header, OpCode},
    util,
};
use crate::{
    compression::decompress_message,
    conn::command::Command,
    error::{Error, ErrorKind, Result},
};

/// Replies larger than this (the server's `maxMessageSizeBytes` ceiling) are rejected
/// rather than buffered.
const MAX_MESSAGE_LENGTH: i32 = 48 * 1024 * 1024;

/// The envelope prefix of an OP_COMPRESSED payload: original opcode (i32), uncompressed
/// size (i32), compressor id (u8).
const COMPRESSED_HEADER_LENGTH: usize = 9;

bitflags! {
    /// Represents the bitwise flags for an OP_MSG as defined by the MongoDB wire
    /// protocol.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub(crate) struct MessageFlags: u32 {
        const CHECKSUM_PRESENT = 0b_0000_0000_0000_0000_0000_0000_0000_0001;
        const MORE_TO_COME     = 0b_0000_0000_0000_0000_0000_0000_0000_0010;
        const EXHAUST_ALLOWED  = 0b_0000_0000_0000_0001_0000_0000_0000_0000;
    }
}

/// A Type-1 (document sequence) payload: a homogeneous list of documents that travels
/// outside the body section under a field-name identifier. Semantically equivalent to
/// embedding the list in the body under the same name.
#[derive(Clone, Debug)]
pub(crate) struct DocumentSequence {
    pub(crate) identifier: String,
    pub(crate) documents: Vec<Document>,
}

/// Represents an OP_MSG wire protocol operation.
///
/// On the outbound path the body and the optional document sequence are kept separate so
/// the sequence can be emitted as Type-1 sections. On the inbound path any sequences have
/// already been folded back into the body under their identifiers.
#[derive(Clone, Debug)]
pub(crate) struct Message {
    pub(crate) response_to: i32,
    pub(crate) flags: MessageFlags,
    pub(crate) body: Document,
    pub(crate) document_sequence: Option<DocumentSequence>,
    pub(crate) checksum: Option<u32>,
}

impl Message {
    /// Creates a `Message` from a given `Command`. The command's target database is
    /// injected as `$db` unless the body already carries one.
    pub(crate) fn with_command(mut command: Command) -> Self {
        if !command.body.contains_key("$db") {
            command.body.insert("$db", command.target_db);
        }

        Self {
            response_to: 0,
            flags: MessageFlags::empty(),
            body: command.body,
            document_sequence: command.document_sequence,
            checksum: None,
        }
    }

    /// Serializes the flags and sections of this message: the payload of an OP_MSG, not
    /// including the wire header.
    ///
    /// A document sequence is split into as many Type-1 sections as needed so that no
    /// single section carries more than `max_batch` documents; every section repeats the
    /// sequence identifier. An empty sequence emits no section at all.
    pub(crate) fn encode_payload(&self, max_batch: usize) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&self.flags.bits().to_le_bytes());

        // Kind 0: the body document. The sequence identifier must not also appear in the
        // body; `Command::extract_sequence` upholds this.
        payload.push(0);
        self.body.to_writer(&mut payload)?;

        if let Some(ref sequence) = self.document_sequence {
            debug_assert!(!self.body.contains_key(&sequence.identifier));

            for batch in sequence.documents.chunks(max_batch.max(1)) {
                let mut documents = Vec::new();
                for document in batch {
                    document.to_writer(&mut documents)?;
                }

                // The size field covers itself, the identifier cstring, and the documents.
                let size = 4 + sequence.identifier.len() + 1 + documents.len();

                payload.push(1);
                payload.extend_from_slice(&i32::try_from(size).map_err(size_overflow)?.to_le_bytes());
                util::write_cstring(&mut payload, &sequence.identifier)?;
                payload.extend_from_slice(&documents);
            }
        }

        // A stored checksum tail is re-emitted verbatim; the flags must already carry
        // CHECKSUM_PRESENT for it to be read back.
        if let Some(checksum) = self.checksum {
            payload.extend_from_slice(&checksum.to_le_bytes());
        }

        Ok(payload)
    }

    /// Builds an OP_COMPRESSED payload around an already-compressed OP_MSG payload.
    pub(crate) fn encode_compressed(
        original_op_code: OpCode,
        uncompressed_size: usize,
        compressor_id: u8,
        compressed: &[u8],
    ) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(COMPRESSED_HEADER_LENGTH + compressed.len());
        payload.extend_from_slice(&(original_op_code as i32).to_le_bytes());
        payload.extend_from_slice(
            &i32::try_from(uncompressed_size)
                .map_err(size_overflow)?
                .to_le_bytes(),
        );
        payload.push(compressor_id);
        payload.extend_from_slice(compressed);
        Ok(payload)
    }

    /// Reads bytes from `reader` and deserializes them into a Message, transparently
    /// unwrapping an OP_COMPRESSED envelope.
    pub(crate) async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let header = Header::read_from(reader).await?;

        if header.length > MAX_MESSAGE_LENGTH {
            return Err(Error::invalid_response(format!(
                "message length {} exceeds the maximum of {}",
                header.length, MAX_MESSAGE_LENGTH
            )));
        }
        let payload_length = (header.length as i64 - Header::LENGTH as i64)
            .try_into()
            .map_err(|_| {
                Error::invalid_response(format!("message length {} is too short", header.length))
            })?;

        let mut payload = vec![0u8; payload_length];
        reader.read_exact(&mut payload).await?;

        Self::decode(header, payload).await
    }

    /// Decodes the payload of a wire message according to its header.
    pub(crate) async fn decode(header: Header, payload: Vec<u8>) -> Result<Self> {
        let payload = match header.op_code {
            OpCode::Message => payload,
            OpCode::Compressed => decompress_payload(payload).await?,
        };

        Self::parse_op_msg(header.response_to, &payload)
    }

    /// Parses the flags and section stream of an OP_MSG payload, folding document
    /// sequences into the body document.
    fn parse_op_msg(response_to: i32, payload: &[u8]) -> Result<Self> {
        let mut reader = payload;

        let bits = util::read_u32(&mut reader)?;
        let flags = MessageFlags::from_bits(bits).ok_or_else(|| {
            Error::invalid_response(format!("unknown bits set in OP_MSG flags: {:#x}", bits))
        })?;
        if flags.contains(MessageFlags::MORE_TO_COME) {
            return Err(Error::invalid_response(
                "streamed replies (moreToCome) are not supported",
            ));
        }

        let mut checksum = None;
        if flags.contains(MessageFlags::CHECKSUM_PRESENT) {
            if reader.len() < 4 {
                return Err(Error::invalid_response(
                    "checksumPresent is set but the message has no checksum",
                ));
            }
            // The CRC-32C tail is carried but not verified.
            let (sections, tail) = reader.split_at(reader.len() - 4);
            checksum = Some(u32::from_le_bytes(tail.try_into().unwrap()));
            reader = sections;
        }

        let mut body: Option<Document> = None;

        while !reader.is_empty() {
            match util::read_u8(&mut reader)? {
                0 => {
                    if body.is_some() {
                        return Err(Error::invalid_response(
                            "OP_MSG contained multiple body sections",
                        ));
                    }
                    body = Some(Document::from_reader(&mut reader)?);
                }
                1 => {
                    let body = body.as_mut().ok_or_else(|| {
                        Error::invalid_response("document sequence appeared before the body")
                    })?;
                    read_document_sequence(&mut reader, body)?;
                }
                other => {
                    return Err(Error::invalid_response(format!(
                        "unsupported OP_MSG section kind: {}",
                        other
                    )));
                }
            }
        }

        let body = body
            .ok_or_else(|| Error::invalid_response("OP_MSG contained no body section"))?;

        Ok(Self {
            response_to,
            flags,
            body,
            document_sequence: None,
            checksum,
        })
    }
}

/// Reads one Type-1 section and appends its documents into `body` under the section
/// identifier, creating the array if absent.
fn read_document_sequence(reader: &mut &[u8], body: &mut Document) -> Result<()> {
    let size = util::read_i32(reader)?;
    let documents_length = (size as i64 - 4)
        .try_into()
        .ok()
        .filter(|length| *length <= reader.len())
        .ok_or_else(|| {
            Error::invalid_response(format!("invalid document sequence size: {}", size))
        })?;

    let (mut section, rest) = reader.split_at(documents_length);
    *reader = rest;

    let identifier = util::read_cstring(&mut section)?;

    let mut documents = Vec::new();
    while !section.is_empty() {
        documents.push(Bson::Document(Document::from_reader(&mut section)?));
    }

    match body.get_mut(&identifier) {
        None => {
            body.insert(identifier, documents);
        }
        Some(Bson::Array(existing)) => existing.extend(documents),
        Some(_) => {
            return Err(Error::invalid_response(format!(
                "document sequence identifier {:?} collides with a non-array body field",
                identifier
            )));
        }
    }

    Ok(())
}

/// Unwraps an OP_COMPRESSED payload: parses the envelope, decompresses off the reactor,
/// and checks the advertised uncompressed size. Only OP_MSG may be carried inside.
async fn decompress_payload(payload: Vec<u8>) -> Result<Vec<u8>> {
    if payload.len() < COMPRESSED_HEADER_LENGTH {
        return Err(Error::invalid_response("truncated OP_COMPRESSED message"));
    }

    let mut reader = payload.as_slice();
    let original_op_code = OpCode::from_i32(util::read_i32(&mut reader)?)?;
    let uncompressed_size = util::read_i32(&mut reader)?;
    let compressor_id = util::read_u8(&mut reader)?;
    let compressed = reader.to_vec();

    if original_op_code != OpCode::Message {
        return Err(Error::invalid_response(format!(
            "OP_COMPRESSED wrapped an unexpected opcode: {}",
            original_op_code as i32
        )));
    }

    let decompressed =
        tokio::task::spawn_blocking(move || decompress_message(&compressed, compressor_id))
            .await
            .map_err(|error| Error::internal(format!("decompression task failed: {error}")))??;

    if decompressed.len() as i64 != uncompressed_size as i64 {
        return Err(Error::invalid_response(format!(
            "decompressed message length {} does not match the advertised length {}",
            decompressed.len(),
            uncompressed_size
        )));
    }

    Ok(decompressed)
}

fn size_overflow(_: std::num::TryFromIntError) -> Error {
    ErrorKind::InvalidArgument {
        message: "message payload exceeds the wire protocol size limit".to_string(),
    }
    .into()
}
