use crate::error::{ErrorKind, Result};

/// Obtain a new request ID: uniform over the non-zero signed 32-bit range. Collisions in
/// the outstanding set are not defended against; a colliding insert fails the older
/// waiter.
pub(crate) fn next_request_id() -> i32 {
    loop {
        let id = rand::random::<i32>();
        if id != 0 {
            return id;
        }
    }
}

/// Serializes `string` to bytes and writes them to `buf` with a null terminator appended.
pub(super) fn write_cstring(buf: &mut Vec<u8>, string: &str) -> Result<()> {
    if string.as_bytes().contains(&0) {
        return Err(ErrorKind::InvalidArgument {
            message: format!("cstring with interior null: {:?}", string),
        }
        .into());
    }

    buf.extend_from_slice(string.as_bytes());
    buf.push(0);

    Ok(())
}

fn truncated() -> crate::error::Error {
    ErrorKind::InvalidResponse {
        message: "message ended mid-field".to_string(),
    }
    .into()
}

pub(super) fn read_u8(reader: &mut &[u8]) -> Result<u8> {
    let (&byte, rest) = reader.split_first().ok_or_else(truncated)?;
    *reader = rest;
    Ok(byte)
}

pub(super) fn read_i32(reader: &mut &[u8]) -> Result<i32> {
    if reader.len() < 4 {
        return Err(truncated());
    }
    let (bytes, rest) = reader.split_at(4);
    *reader = rest;
    Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
}

pub(super) fn read_u32(reader: &mut &[u8]) -> Result<u32> {
    if reader.len() < 4 {
        return Err(truncated());
    }
    let (bytes, rest) = reader.split_at(4);
    *reader = rest;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

pub(super) fn read_cstring(reader: &mut &[u8]) -> Result<String> {
    let end = reader
        .iter()
        .position(|&byte| byte == 0)
        .ok_or_else(truncated)?;
    let (bytes, rest) = reader.split_at(end);
    let string = std::str::from_utf8(bytes)
        .map_err(|_| {
            ErrorKind::InvalidResponse {
                message: "document sequence identifier is not valid UTF-8".to_string(),
            }
        })?
        .to_string();
    // Skip the null terminator.
    *reader = &rest[1..];
    Ok(string)
}
