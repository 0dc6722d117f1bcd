//! NFC Forum Type 2 tag memory layout (NTAG21x, MIFARE Ultralight)
//!
//! User memory starts at page 4 and holds a sequence of TLV blocks. The NDEF
//! message lives in an NDEF TLV and the sequence ends with a terminator TLV.

pub const PAGE_SIZE: usize = 4;

/// First page of user memory
pub const FIRST_USER_PAGE: u8 = 4;

/// Capability container page
pub const CC_PAGE: u8 = 3;

/// First byte of a valid capability container
pub const CC_MAGIC: u8 = 0xE1;

pub const TLV_NULL: u8 = 0x00;
pub const TLV_LOCK_CONTROL: u8 = 0x01;
pub const TLV_MEMORY_CONTROL: u8 = 0x02;
pub const TLV_NDEF: u8 = 0x03;
pub const TLV_TERMINATOR: u8 = 0xFE;

/// Largest value a three byte TLV length can describe
pub const MAX_TLV_LEN: usize = 0xFFFE;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TlvError {
    #[error("TLV data truncated")]
    Truncated,
    #[error("no NDEF message in tag memory")]
    NoNdefMessage,
    #[error("NDEF message of {0} bytes does not fit a TLV")]
    TooLarge(usize),
}

/// Wrap an NDEF message for user memory, padded to whole pages
pub fn ndef_tlv(message: &[u8]) -> Result<Vec<u8>, TlvError> {
    let len = message.len();
    if len > MAX_TLV_LEN {
        return Err(TlvError::TooLarge(len));
    }

    let mut buf = Vec::with_capacity(len + 8);
    buf.push(TLV_NDEF);
    if len < 0xFF {
        buf.push(len as u8);
    } else {
        buf.push(0xFF);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    }
    buf.extend_from_slice(message);
    buf.push(TLV_TERMINATOR);

    let padded = buf.len().div_ceil(PAGE_SIZE) * PAGE_SIZE;
    buf.resize(padded, 0x00);
    Ok(buf)
}

/// Split page aligned data into pages
pub fn pages(data: &[u8]) -> impl Iterator<Item = [u8; PAGE_SIZE]> + '_ {
    data.chunks(PAGE_SIZE).map(|chunk| {
        let mut page = [0u8; PAGE_SIZE];
        page[..chunk.len()].copy_from_slice(chunk);
        page
    })
}

/// Data area size in bytes announced by a capability container
pub fn data_area_size(cc: &[u8; PAGE_SIZE]) -> Option<usize> {
    if cc[0] != CC_MAGIC {
        return None;
    }
    Some(cc[2] as usize * 8)
}

/// Find the NDEF message in user memory
///
/// Returns [`TlvError::Truncated`] when `memory` ends inside a TLV, so a
/// reader can fetch more pages and try again.
pub fn extract_ndef(memory: &[u8]) -> Result<Vec<u8>, TlvError> {
    let mut pos = 0;
    while pos < memory.len() {
        let tag = memory[pos];
        match tag {
            TLV_NULL => {
                pos += 1;
                continue;
            }
            TLV_TERMINATOR => return Err(TlvError::NoNdefMessage),
            _ => {}
        }

        let first = *memory.get(pos + 1).ok_or(TlvError::Truncated)?;
        let (len, header) = if first == 0xFF {
            let bytes = memory.get(pos + 2..pos + 4).ok_or(TlvError::Truncated)?;
            (u16::from_be_bytes([bytes[0], bytes[1]]) as usize, 4)
        } else {
            (first as usize, 2)
        };

        let start = pos + header;
        let value = memory.get(start..start + len).ok_or(TlvError::Truncated)?;
        if tag == TLV_NDEF {
            return Ok(value.to_vec());
        }
        pos = start + len;
    }
    Err(TlvError::Truncated)
}
