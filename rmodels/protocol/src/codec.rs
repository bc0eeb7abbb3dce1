use std::io::{Read, Write};

use crate::{error::ProtocolError, qap, rexp::Rexp};

/// Bytes in a message header.
pub const HEADER_LEN: usize = 16;
/// Bytes in the server identification block.
pub const ID_BLOCK_LEN: usize = 32;

const MAX_SHORT_LEN: usize = 0x00ff_ffff;
const INITIAL_PAYLOAD_CAPACITY: usize = 64 * 1024;

/// Parameter of a request.
#[derive(Debug, Clone, Copy)]
pub enum Param<'a> {
    /// `DT_STRING`.
    Text(&'a str),
}

/// Encodes one request: header followed by its parameters.
pub fn encode_request(command: i32, params: &[Param<'_>]) -> Result<Vec<u8>, ProtocolError> {
    let mut body = Vec::new();
    for param in params {
        match param {
            Param::Text(text) => {
                if text.as_bytes().contains(&0) {
                    return Err(ProtocolError::InvalidRequest(
                        "string parameters cannot contain NUL bytes".to_string(),
                    ));
                }
                let mut content = text.as_bytes().to_vec();
                content.push(0);
                while content.len() % 4 != 0 {
                    content.push(0);
                }
                param_header(&mut body, qap::DT_STRING, content.len());
                body.extend_from_slice(&content);
            }
        }
    }

    let len = body.len() as u64;
    let mut message = Vec::with_capacity(HEADER_LEN + body.len());
    message.extend_from_slice(&command.to_le_bytes());
    message.extend_from_slice(&low_word(len).to_le_bytes());
    message.extend_from_slice(&0u32.to_le_bytes());
    message.extend_from_slice(&high_word(len).to_le_bytes());
    message.extend_from_slice(&body);
    Ok(message)
}

/// Writes one request and flushes the transport.
pub fn write_request<W: Write>(
    writer: &mut W,
    command: i32,
    params: &[Param<'_>],
) -> Result<(), ProtocolError> {
    let message = encode_request(command, params)?;
    writer.write_all(&message)?;
    writer.flush()?;
    Ok(())
}

/// Reads one response and returns its payload, mapping error statuses.
pub fn read_response<R: Read>(reader: &mut R, command: i32) -> Result<Vec<u8>, ProtocolError> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;
    let status = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let low = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let high = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);
    let expected = (u64::from(high) << 32) | u64::from(low);
    let len = usize::try_from(expected)
        .map_err(|_| ProtocolError::Decode("response too large".to_string()))?;

    let mut payload = Vec::with_capacity(len.min(INITIAL_PAYLOAD_CAPACITY));
    reader.by_ref().take(expected).read_to_end(&mut payload)?;
    if payload.len() != len {
        return Err(ProtocolError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("response truncated at {} of {len} bytes", payload.len()),
        )));
    }

    if status & qap::CMD_OOB != 0 {
        return Err(ProtocolError::Decode(format!(
            "unexpected out-of-band message {status:#x}"
        )));
    }
    match status & 0x000f_ffff {
        qap::RESP_OK => Ok(payload),
        qap::RESP_ERR => Err(ProtocolError::Server {
            command,
            code: status.to_le_bytes()[3] & 0x7f,
        }),
        other => Err(ProtocolError::Decode(format!(
            "unknown response status {other:#x}"
        ))),
    }
}

/// Decodes the expression carried by an evaluation response.
pub fn decode_sexp_payload(payload: &[u8]) -> Result<Rexp, ProtocolError> {
    if payload.is_empty() {
        return Ok(Rexp::plain(crate::rexp::RValue::Null));
    }
    if payload.len() < 4 {
        return Err(ProtocolError::Decode(format!(
            "parameter header truncated at {} bytes",
            payload.len()
        )));
    }
    let kind = payload[0];
    let mut len = usize::from(payload[1])
        | (usize::from(payload[2]) << 8)
        | (usize::from(payload[3]) << 16);
    let mut offset: usize = 4;
    if kind & qap::DT_LARGE != 0 {
        if payload.len() < 8 {
            return Err(ProtocolError::Decode("large parameter header truncated".to_string()));
        }
        let high = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        len |= usize::try_from(high)
            .map_err(|_| ProtocolError::Decode("parameter too large".to_string()))?
            << 24;
        offset = 8;
    }
    if kind & !qap::DT_LARGE != qap::DT_SEXP {
        return Err(ProtocolError::Decode(format!(
            "expected an expression parameter, got type {kind}"
        )));
    }
    let end = offset
        .checked_add(len)
        .filter(|end| *end <= payload.len())
        .ok_or_else(|| ProtocolError::Decode("expression parameter truncated".to_string()))?;
    Rexp::decode(&payload[offset..end])
}

fn param_header(out: &mut Vec<u8>, kind: u8, len: usize) {
    let bytes = (len as u64).to_le_bytes();
    if len > MAX_SHORT_LEN {
        out.push(kind | qap::DT_LARGE);
        out.extend_from_slice(&bytes[..7]);
    } else {
        out.push(kind);
        out.extend_from_slice(&bytes[..3]);
    }
}

const fn low_word(len: u64) -> u32 {
    (len & 0xffff_ffff) as u32
}

const fn high_word(len: u64) -> u32 {
    (len >> 32) as u32
}
