//! NDEF message carrying the join payload
//!
//! The tag holds a single well-known Text record (`TNF=0x01`, type `T`) whose
//! text is the complete payload string. Record layout:
//!
//! ```text
//! header | type length | payload length (1 or 4 bytes) | type | payload
//! payload = status byte (UTF-8, language length) | language | text
//! ```

use crate::ProvisioningPayload;

pub const FLAG_MB: u8 = 0x80;
pub const FLAG_ME: u8 = 0x40;
pub const FLAG_CF: u8 = 0x20;
pub const FLAG_SR: u8 = 0x10;
pub const FLAG_IL: u8 = 0x08;
pub const TNF_MASK: u8 = 0x07;

/// NFC Forum well-known type
pub const TNF_WELL_KNOWN: u8 = 0x01;

/// Record type of a Text record
pub const RTD_TEXT: &[u8] = b"T";

/// Language code written into the Text record
pub const LANGUAGE: &str = "en";

const STATUS_UTF16: u8 = 0x80;
const STATUS_LANG_LEN_MASK: u8 = 0x3F;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record truncated")]
    Truncated,
    #[error("expected a single-record message")]
    NotSingleRecord,
    #[error("chunked records are not supported")]
    Chunked,
    #[error("unexpected TNF 0x{0:02x}")]
    UnexpectedTnf(u8),
    #[error("record type {0:?} is not a Text record")]
    NotText(Vec<u8>),
    #[error("UTF-16 text records are not supported")]
    Utf16,
    #[error("record text is not valid UTF-8")]
    InvalidUtf8,
}

/// Tag record for a provisioning payload: one complete Text record, never truncated
pub fn to_tag_record(payload: &ProvisioningPayload) -> Vec<u8> {
    text_record(payload.as_str())
}

/// Text carried by a record produced by [`to_tag_record`]
pub fn parse_tag_record(message: &[u8]) -> Result<String, RecordError> {
    parse_text_record(message)
}

/// Single-record NDEF message with a UTF-8 Text record in [`LANGUAGE`]
pub fn text_record(text: &str) -> Vec<u8> {
    let payload_len = 1 + LANGUAGE.len() + text.len();
    let short = payload_len < 256;

    let mut buf = Vec::with_capacity(payload_len + 7);
    let mut header = FLAG_MB | FLAG_ME | TNF_WELL_KNOWN;
    if short {
        header |= FLAG_SR;
    }
    buf.push(header);
    buf.push(RTD_TEXT.len() as u8);
    if short {
        buf.push(payload_len as u8);
    } else {
        buf.extend_from_slice(&(payload_len as u32).to_be_bytes());
    }
    buf.extend_from_slice(RTD_TEXT);
    buf.push(LANGUAGE.len() as u8);
    buf.extend_from_slice(LANGUAGE.as_bytes());
    buf.extend_from_slice(text.as_bytes());
    buf
}

/// Text of a single-record NDEF message holding a Text record
pub fn parse_text_record(message: &[u8]) -> Result<String, RecordError> {
    let header = *message.first().ok_or(RecordError::Truncated)?;
    if header & FLAG_MB == 0 || header & FLAG_ME == 0 {
        return Err(RecordError::NotSingleRecord);
    }
    if header & FLAG_CF != 0 {
        return Err(RecordError::Chunked);
    }
    let tnf = header & TNF_MASK;
    if tnf != TNF_WELL_KNOWN {
        return Err(RecordError::UnexpectedTnf(tnf));
    }

    let mut pos = 1;
    let type_len = *message.get(pos).ok_or(RecordError::Truncated)? as usize;
    pos += 1;

    let payload_len = if header & FLAG_SR != 0 {
        let len = *message.get(pos).ok_or(RecordError::Truncated)? as usize;
        pos += 1;
        len
    } else {
        let bytes = message.get(pos..pos + 4).ok_or(RecordError::Truncated)?;
        pos += 4;
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
    };

    let id_len = if header & FLAG_IL != 0 {
        let len = *message.get(pos).ok_or(RecordError::Truncated)? as usize;
        pos += 1;
        len
    } else {
        0
    };

    let record_type = message.get(pos..pos + type_len).ok_or(RecordError::Truncated)?;
    if record_type != RTD_TEXT {
        return Err(RecordError::NotText(record_type.to_vec()));
    }
    pos += type_len + id_len;

    let payload = message
        .get(pos..pos + payload_len)
        .ok_or(RecordError::Truncated)?;
    let status = *payload.first().ok_or(RecordError::Truncated)?;
    if status & STATUS_UTF16 != 0 {
        return Err(RecordError::Utf16);
    }
    let lang_len = (status & STATUS_LANG_LEN_MASK) as usize;
    let text = payload.get(1 + lang_len..).ok_or(RecordError::Truncated)?;

    String::from_utf8(text.to_vec()).map_err(|_| RecordError::InvalidUtf8)
}
