use bson::{doc, Bson, Document};

use super::{
    header::{Header, OpCode},
    message::{DocumentSequence, Message, MessageFlags},
    util,
};
use crate::compression::Compressor;

fn message(body: Document, document_sequence: Option<DocumentSequence>) -> Message {
    Message {
        response_to: 0,
        flags: MessageFlags::empty(),
        body,
        document_sequence,
        checksum: None,
    }
}

fn sequence(identifier: &str, documents: Vec<Document>) -> Option<DocumentSequence> {
    Some(DocumentSequence {
        identifier: identifier.to_string(),
        documents,
    })
}

fn header_for(payload: &[u8], op_code: OpCode) -> Header {
    Header {
        length: (Header::LENGTH + payload.len()) as i32,
        request_id: 1,
        response_to: 42,
        op_code,
    }
}

async fn roundtrip(message: &Message, max_batch: usize) -> crate::error::Result<Message> {
    let payload = message.encode_payload(max_batch).unwrap();
    Message::decode(header_for(&payload, OpCode::Message), payload).await
}

fn doc_bytes(document: &Document) -> Vec<u8> {
    let mut bytes = Vec::new();
    document.to_writer(&mut bytes).unwrap();
    bytes
}

fn push_sequence_section(payload: &mut Vec<u8>, identifier: &str, documents: &[Document]) {
    let mut bytes = Vec::new();
    for document in documents {
        bytes.extend_from_slice(&doc_bytes(document));
    }
    payload.push(1);
    payload.extend_from_slice(&((4 + identifier.len() + 1 + bytes.len()) as i32).to_le_bytes());
    util::write_cstring(payload, identifier).unwrap();
    payload.extend_from_slice(&bytes);
}

/// Splits an encoded OP_MSG payload into its flag bits, body document, and raw Type-1
/// sections, without folding.
pub(crate) fn scan_sections(mut payload: &[u8]) -> (u32, Document, Vec<(String, Vec<Document>)>) {
    let flags = util::read_u32(&mut payload).unwrap();
    let mut body = None;
    let mut sequences = Vec::new();

    while !payload.is_empty() {
        match util::read_u8(&mut payload).unwrap() {
            0 => {
                assert!(body.is_none(), "more than one body section");
                body = Some(Document::from_reader(&mut payload).unwrap());
            }
            1 => {
                let size = util::read_i32(&mut payload).unwrap();
                let (mut section, rest) = payload.split_at(size as usize - 4);
                payload = rest;
                let identifier = util::read_cstring(&mut section).unwrap();
                let mut documents = Vec::new();
                while !section.is_empty() {
                    documents.push(Document::from_reader(&mut section).unwrap());
                }
                sequences.push((identifier, documents));
            }
            other => panic!("unexpected section kind {other}"),
        }
    }

    (flags, body.expect("no body section"), sequences)
}

#[tokio::test]
async fn simple_body_roundtrip() {
    let body = doc! { "foo": "bar", "spam": "eggs" };
    let decoded = roundtrip(&message(body.clone(), None), 1000).await.unwrap();

    assert_eq!(decoded.body, body);
    assert_eq!(decoded.response_to, 42);
    assert_eq!(decoded.checksum, None);
}

#[tokio::test]
async fn document_sequence_travels_as_type_1_section() {
    let item = doc! { "a": 1 };
    let msg = message(
        doc! { "insert": "c" },
        sequence("documents", vec![item.clone(), item.clone(), item.clone()]),
    );

    let payload = msg.encode_payload(1000).unwrap();
    let (flags, body, sequences) = scan_sections(&payload);

    assert_eq!(flags, 0);
    assert!(!body.contains_key("documents"));
    assert_eq!(sequences.len(), 1);
    assert_eq!(sequences[0].0, "documents");
    assert_eq!(sequences[0].1.len(), 3);

    // Decoding folds the sequence back under its identifier.
    let decoded = Message::decode(header_for(&payload, OpCode::Message), payload)
        .await
        .unwrap();
    assert_eq!(
        decoded.body,
        doc! { "insert": "c", "documents": [item.clone(), item.clone(), item] }
    );
}

#[tokio::test]
async fn document_sequence_splits_at_the_batch_bound() {
    let documents: Vec<Document> = (0..5).map(|i| doc! { "i": i }).collect();
    let msg = message(doc! { "insert": "c" }, sequence("documents", documents));

    let payload = msg.encode_payload(2).unwrap();
    let (_, _, sequences) = scan_sections(&payload);

    let sizes: Vec<usize> = sequences.iter().map(|(_, docs)| docs.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert!(sequences
        .iter()
        .all(|(identifier, _)| identifier == "documents"));

    let decoded = Message::decode(header_for(&payload, OpCode::Message), payload)
        .await
        .unwrap();
    let folded = decoded.body.get_array("documents").unwrap();
    assert_eq!(
        folded.clone(),
        (0..5).map(|i| Bson::from(doc! { "i": i })).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn empty_document_sequence_encodes_no_section() {
    let msg = message(doc! { "insert": "c" }, sequence("documents", Vec::new()));
    let payload = msg.encode_payload(1000).unwrap();
    let (_, _, sequences) = scan_sections(&payload);
    assert!(sequences.is_empty());
}

#[tokio::test]
async fn empty_document_sequence_decodes_to_an_empty_array() {
    let mut payload = 0u32.to_le_bytes().to_vec();
    payload.push(0);
    payload.extend_from_slice(&doc_bytes(&doc! { "ok": 1 }));
    push_sequence_section(&mut payload, "documents", &[]);

    let decoded = Message::decode(header_for(&payload, OpCode::Message), payload)
        .await
        .unwrap();
    assert_eq!(decoded.body, doc! { "ok": 1, "documents": [] });
}

#[tokio::test]
async fn document_sequence_extends_an_existing_array() {
    let mut payload = 0u32.to_le_bytes().to_vec();
    payload.push(0);
    payload.extend_from_slice(&doc_bytes(&doc! { "ok": 1, "documents": [{ "i": 0 }] }));
    push_sequence_section(&mut payload, "documents", &[doc! { "i": 1 }]);

    let decoded = Message::decode(header_for(&payload, OpCode::Message), payload)
        .await
        .unwrap();
    assert_eq!(
        decoded.body,
        doc! { "ok": 1, "documents": [{ "i": 0 }, { "i": 1 }] }
    );
}

#[tokio::test]
async fn document_sequence_scalar_collision_is_rejected() {
    let mut payload = 0u32.to_le_bytes().to_vec();
    payload.push(0);
    payload.extend_from_slice(&doc_bytes(&doc! { "ok": 1, "documents": 5 }));
    push_sequence_section(&mut payload, "documents", &[doc! { "i": 1 }]);

    let error = Message::decode(header_for(&payload, OpCode::Message), payload)
        .await
        .unwrap_err();
    assert!(error.is_invalid_response(), "{error}");
}

#[tokio::test]
async fn unknown_flag_bits_are_rejected() {
    let mut payload = (1u32 << 5).to_le_bytes().to_vec();
    payload.push(0);
    payload.extend_from_slice(&doc_bytes(&doc! { "ok": 1 }));

    let error = Message::decode(header_for(&payload, OpCode::Message), payload)
        .await
        .unwrap_err();
    assert!(error.is_invalid_response(), "{error}");
}

#[tokio::test]
async fn more_to_come_replies_are_rejected() {
    let mut payload = MessageFlags::MORE_TO_COME.bits().to_le_bytes().to_vec();
    payload.push(0);
    payload.extend_from_slice(&doc_bytes(&doc! { "ok": 1 }));

    let error = Message::decode(header_for(&payload, OpCode::Message), payload)
        .await
        .unwrap_err();
    assert!(error.is_invalid_response(), "{error}");
}

#[tokio::test]
async fn checksum_tail_is_carried() {
    let mut payload = MessageFlags::CHECKSUM_PRESENT
        .bits()
        .to_le_bytes()
        .to_vec();
    payload.push(0);
    payload.extend_from_slice(&doc_bytes(&doc! { "ok": 1 }));
    payload.extend_from_slice(&0xDEADBEEFu32.to_le_bytes());

    let decoded = Message::decode(header_for(&payload, OpCode::Message), payload)
        .await
        .unwrap();
    assert_eq!(decoded.body, doc! { "ok": 1 });
    assert_eq!(decoded.checksum, Some(0xDEADBEEF));
}

#[tokio::test]
async fn multiple_body_sections_are_rejected() {
    let mut payload = 0u32.to_le_bytes().to_vec();
    payload.push(0);
    payload.extend_from_slice(&doc_bytes(&doc! { "ok": 1 }));
    payload.push(0);
    payload.extend_from_slice(&doc_bytes(&doc! { "ok": 1 }));

    let error = Message::decode(header_for(&payload, OpCode::Message), payload)
        .await
        .unwrap_err();
    assert!(error.is_invalid_response(), "{error}");
}

#[tokio::test]
async fn document_sequence_before_body_is_rejected() {
    let mut payload = 0u32.to_le_bytes().to_vec();
    push_sequence_section(&mut payload, "documents", &[doc! { "i": 1 }]);

    let error = Message::decode(header_for(&payload, OpCode::Message), payload)
        .await
        .unwrap_err();
    assert!(error.is_invalid_response(), "{error}");
}

#[tokio::test]
async fn unknown_section_kinds_are_rejected() {
    let mut payload = 0u32.to_le_bytes().to_vec();
    payload.push(0);
    payload.extend_from_slice(&doc_bytes(&doc! { "ok": 1 }));
    payload.push(5);

    let error = Message::decode(header_for(&payload, OpCode::Message), payload)
        .await
        .unwrap_err();
    assert!(error.is_invalid_response(), "{error}");
}

#[tokio::test]
async fn missing_body_is_rejected() {
    let payload = 0u32.to_le_bytes().to_vec();
    let error = Message::decode(header_for(&payload, OpCode::Message), payload)
        .await
        .unwrap_err();
    assert!(error.is_invalid_response(), "{error}");
}

#[tokio::test]
async fn compressed_roundtrip() {
    let body = doc! { "ping": 1, "$db": "admin" };
    let msg = message(body.clone(), None);
    let op_msg_payload = msg.encode_payload(1000).unwrap();

    let compressor = Compressor::Zlib { level: None };
    let compressed = compressor.compress(&op_msg_payload).unwrap();
    let payload = Message::encode_compressed(
        OpCode::Message,
        op_msg_payload.len(),
        compressor.id(),
        &compressed,
    )
    .unwrap();

    let decoded = Message::decode(header_for(&payload, OpCode::Compressed), payload)
        .await
        .unwrap();
    assert_eq!(decoded.body, body);
}

#[tokio::test]
async fn decompressed_length_mismatch_is_rejected() {
    let op_msg_payload = message(doc! { "ping": 1 }, None).encode_payload(1000).unwrap();

    let compressor = Compressor::Zlib { level: None };
    let compressed = compressor.compress(&op_msg_payload).unwrap();
    let payload = Message::encode_compressed(
        OpCode::Message,
        op_msg_payload.len() + 1,
        compressor.id(),
        &compressed,
    )
    .unwrap();

    let error = Message::decode(header_for(&payload, OpCode::Compressed), payload)
        .await
        .unwrap_err();
    assert!(error.is_invalid_response(), "{error}");
}

#[tokio::test]
async fn unknown_compressor_id_is_rejected() {
    let op_msg_payload = message(doc! { "ping": 1 }, None).encode_payload(1000).unwrap();
    let payload =
        Message::encode_compressed(OpCode::Message, op_msg_payload.len(), 9, &op_msg_payload)
            .unwrap();

    let error = Message::decode(header_for(&payload, OpCode::Compressed), payload)
        .await
        .unwrap_err();
    assert!(error.is_invalid_response(), "{error}");
}

#[tokio::test]
async fn unknown_opcodes_are_rejected() {
    // OP_QUERY, long gone from the protocol.
    let mut frame = Vec::new();
    frame.extend_from_slice(&21i32.to_le_bytes());
    frame.extend_from_slice(&1i32.to_le_bytes());
    frame.extend_from_slice(&0i32.to_le_bytes());
    frame.extend_from_slice(&2004i32.to_le_bytes());
    frame.extend_from_slice(&[0; 5]);

    let error = Message::read_from(&mut frame.as_slice()).await.unwrap_err();
    assert!(error.is_invalid_response(), "{error}");
}

#[tokio::test]
async fn oversized_messages_are_rejected() {
    let mut frame = Vec::new();
    frame.extend_from_slice(&(256 * 1024 * 1024i32).to_le_bytes());
    frame.extend_from_slice(&1i32.to_le_bytes());
    frame.extend_from_slice(&0i32.to_le_bytes());
    frame.extend_from_slice(&2013i32.to_le_bytes());

    let error = Message::read_from(&mut frame.as_slice()).await.unwrap_err();
    assert!(error.is_invalid_response(), "{error}");
}

#[tokio::test]
async fn full_frame_roundtrip() {
    let body = doc! { "hello": 1, "$db": "admin" };
    let payload = message(body.clone(), None).encode_payload(1000).unwrap();

    let mut frame = Vec::new();
    header_for(&payload, OpCode::Message)
        .write_to(&mut frame)
        .await
        .unwrap();
    frame.extend_from_slice(&payload);

    let decoded = Message::read_from(&mut frame.as_slice()).await.unwrap();
    assert_eq!(decoded.body, body);
    assert_eq!(decoded.response_to, 42);
}

#[tokio::test]
async fn header_roundtrip() {
    let header = Header {
        length: 1234,
        request_id: -7,
        response_to: 99,
        op_code: OpCode::Compressed,
    };

    let mut bytes = Vec::new();
    header.write_to(&mut bytes).await.unwrap();
    assert_eq!(bytes.len(), Header::LENGTH);

    let parsed = Header::read_from(&mut bytes.as_slice()).await.unwrap();
    assert_eq!(parsed.length, 1234);
    assert_eq!(parsed.request_id, -7);
    assert_eq!(parsed.response_to, 99);
    assert_eq!(parsed.op_code, OpCode::Compressed);
}

#[test]
fn request_ids_are_nonzero() {
    for _ in 0..10_000 {
        assert_ne!(super::next_request_id(), 0);
    }
}
