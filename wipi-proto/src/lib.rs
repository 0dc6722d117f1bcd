//! wi-pi payload codec
//!
//! Pure encoding for the Wi-Fi hand-off: the `WIFI:` join payload shown in
//! the QR code, the NDEF record written to the tag, and the Type 2 tag
//! memory layout the record is stored in. No I/O happens here.

pub mod ndef;
pub mod type2;
pub mod wifi;

pub use ndef::{RecordError, parse_tag_record, to_tag_record};
pub use wifi::{
    AUTH_OPEN, AUTH_WPA, Credentials, DecodeError, DecodedPayload, EncodingError,
    ProvisioningPayload, decode, encode, escape,
};
