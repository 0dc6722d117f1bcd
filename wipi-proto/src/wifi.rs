//! Wi-Fi network join payload
//!
//! The de-facto `WIFI:` convention understood by phone cameras, QR scanners
//! and NFC Wi-Fi readers:
//!
//! ```text
//! WIFI:T:<WPA|nopass>;S:<ssid>;P:<secret>;;
//! ```
//!
//! `;` `,` `:` and `\` inside the SSID and secret are escaped with a backslash.

use std::fmt;
use std::str::Chars;

pub const PREFIX: &str = "WIFI:";

/// Authentication type written for networks that need a secret
pub const AUTH_WPA: &str = "WPA";

/// Authentication type written for open networks
pub const AUTH_OPEN: &str = "nopass";

/// Characters that must be backslash-escaped inside a field value
pub const SPECIAL_CHARS: [char; 4] = [';', ',', ':', '\\'];

/// Credentials for a network, as captured by the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub network_name: String,
    pub secret: String,
    pub security_required: bool,
}

impl Credentials {
    pub fn new(network_name: &str, secret: &str, security_required: bool) -> Self {
        Self {
            network_name: network_name.to_string(),
            secret: secret.to_string(),
            security_required,
        }
    }

    /// WPA protected network
    pub fn secured(network_name: &str, secret: &str) -> Self {
        Self::new(network_name, secret, true)
    }

    /// Open network, no secret
    pub fn open(network_name: &str) -> Self {
        Self::new(network_name, "", false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    #[error("network name must not be empty")]
    EmptyNetworkName,
    #[error("network {0:?} requires a secret")]
    MissingSecret(String),
}

/// Canonical payload string for one submission
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProvisioningPayload(String);

impl ProvisioningPayload {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ProvisioningPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ProvisioningPayload {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Build the join payload for `credentials`
///
/// The secret of an open network is never written.
pub fn encode(credentials: &Credentials) -> Result<ProvisioningPayload, EncodingError> {
    if credentials.network_name.is_empty() {
        return Err(EncodingError::EmptyNetworkName);
    }
    if credentials.security_required && credentials.secret.is_empty() {
        return Err(EncodingError::MissingSecret(credentials.network_name.clone()));
    }

    let (auth, secret) = if credentials.security_required {
        (AUTH_WPA, credentials.secret.as_str())
    } else {
        (AUTH_OPEN, "")
    };

    let mut out = String::with_capacity(
        PREFIX.len() + 16 + 2 * (credentials.network_name.len() + secret.len()),
    );
    out.push_str(PREFIX);
    out.push_str("T:");
    out.push_str(auth);
    out.push_str(";S:");
    escape_into(&mut out, &credentials.network_name);
    out.push_str(";P:");
    escape_into(&mut out, secret);
    out.push_str(";;");

    Ok(ProvisioningPayload(out))
}

/// Escape a field value
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    escape_into(&mut out, value);
    out
}

fn escape_into(out: &mut String, value: &str) {
    for c in value.chars() {
        if SPECIAL_CHARS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Fields recovered from a join payload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedPayload {
    pub auth: String,
    pub network_name: String,
    pub secret: String,
    pub hidden: bool,
}

impl DecodedPayload {
    pub fn security_required(&self) -> bool {
        !self.auth.is_empty() && !self.auth.eq_ignore_ascii_case(AUTH_OPEN)
    }

    pub fn into_credentials(self) -> Credentials {
        let security_required = self.security_required();
        Credentials {
            network_name: self.network_name,
            secret: self.secret,
            security_required,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload does not start with \"WIFI:\"")]
    MissingPrefix,
    #[error("payload is not terminated with \";;\"")]
    Unterminated,
    #[error("unexpected character {0:?} in field name")]
    MalformedField(char),
    #[error("payload has no S: field")]
    MissingNetworkName,
    #[error("unexpected data after terminator: {0:?}")]
    TrailingData(String),
}

/// Parse a join payload; fields may appear in any order
pub fn decode(payload: &str) -> Result<DecodedPayload, DecodeError> {
    let body = payload.strip_prefix(PREFIX).ok_or(DecodeError::MissingPrefix)?;
    let mut chars = body.chars();

    let mut decoded = DecodedPayload::default();
    let mut saw_ssid = false;

    while let Some(key) = read_key(&mut chars)? {
        let value = read_value(&mut chars)?;
        match key.as_str() {
            "T" => decoded.auth = value,
            "S" => {
                decoded.network_name = value;
                saw_ssid = true;
            }
            "P" => decoded.secret = value,
            "H" => decoded.hidden = value.eq_ignore_ascii_case("true"),
            // unknown fields (e.g. EAP extensions) are ignored
            _ => {}
        }
    }

    let rest = chars.as_str();
    if !rest.is_empty() {
        return Err(DecodeError::TrailingData(rest.to_string()));
    }
    if !saw_ssid {
        return Err(DecodeError::MissingNetworkName);
    }

    Ok(decoded)
}

/// Returns `None` on the empty field that closes the payload
fn read_key(chars: &mut Chars<'_>) -> Result<Option<String>, DecodeError> {
    let mut key = String::new();
    loop {
        match chars.next() {
            None => return Err(DecodeError::Unterminated),
            Some(';') if key.is_empty() => return Ok(None),
            Some(':') if !key.is_empty() => return Ok(Some(key)),
            Some(c) if c.is_ascii_alphabetic() => key.push(c),
            Some(c) => return Err(DecodeError::MalformedField(c)),
        }
    }
}

fn read_value(chars: &mut Chars<'_>) -> Result<String, DecodeError> {
    let mut value = String::new();
    loop {
        match chars.next() {
            None => return Err(DecodeError::Unterminated),
            Some('\\') => match chars.next() {
                Some(c) => value.push(c),
                None => return Err(DecodeError::Unterminated),
            },
            Some(';') => return Ok(value),
            Some(c) => value.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Values between `S:`/`P:` and the closing `;` must not contain a bare delimiter
    fn assert_fully_escaped(payload: &str) {
        let fields = payload
            .strip_prefix(PREFIX)
            .and_then(|p| p.strip_suffix(";;"))
            .expect("well formed payload");
        let mut chars = fields.chars().peekable();
        let mut in_value = false;
        let mut key = String::new();
        while let Some(c) = chars.next() {
            if !in_value {
                if c == ':' {
                    in_value = true;
                } else {
                    key.push(c);
                }
                continue;
            }
            match c {
                '\\' => {
                    let escaped = chars.next().expect("escape followed by a character");
                    assert!(SPECIAL_CHARS.contains(&escaped), "needless escape of {escaped:?}");
                }
                ';' => {
                    in_value = false;
                    key.clear();
                }
                ',' | ':' => panic!("unescaped {c:?} in field {key} of {payload}"),
                _ => {}
            }
        }
    }

    #[test]
    fn secured_network_example() {
        let payload = encode(&Credentials::secured("Lab-Guest", "pass word;1")).unwrap();
        assert_eq!(payload.as_str(), r"WIFI:T:WPA;S:Lab-Guest;P:pass word\;1;;");
    }

    #[test]
    fn open_network_example() {
        let payload = encode(&Credentials::open("Lobby")).unwrap();
        assert_eq!(payload.as_str(), "WIFI:T:nopass;S:Lobby;P:;;");
    }

    #[test]
    fn open_network_drops_secret() {
        let payload = encode(&Credentials::new("Lobby", "ignored", false)).unwrap();
        assert_eq!(payload.as_str(), "WIFI:T:nopass;S:Lobby;P:;;");
    }

    #[test]
    fn empty_name_is_rejected() {
        assert_eq!(
            encode(&Credentials::secured("", "secret")),
            Err(EncodingError::EmptyNetworkName)
        );
        assert_eq!(encode(&Credentials::open("")), Err(EncodingError::EmptyNetworkName));
    }

    #[test]
    fn secured_network_needs_secret() {
        assert_eq!(
            encode(&Credentials::secured("Office", "")),
            Err(EncodingError::MissingSecret("Office".to_string()))
        );
    }

    #[test]
    fn escapes_every_special_character() {
        let credentials = Credentials::secured(r"a;b,c:d\e", r"\\;;,,::");
        let payload = encode(&credentials).unwrap();
        assert_eq!(
            payload.as_str(),
            r"WIFI:T:WPA;S:a\;b\,c\:d\\e;P:\\\\\;\;\,\,\:\:;;"
        );
        assert_fully_escaped(payload.as_str());
    }

    #[test]
    fn round_trips() {
        let cases = [
            Credentials::secured("Lab-Guest", "pass word;1"),
            Credentials::secured("café ☕", "ünïcode:pass"),
            Credentials::secured(r"\;\", r",:\"),
            Credentials::secured("trailing\\", "x"),
            Credentials::open("Lobby"),
            Credentials::open("semi;colon"),
        ];
        for credentials in cases {
            let payload = encode(&credentials).unwrap();
            assert_fully_escaped(payload.as_str());
            let decoded = decode(payload.as_str()).unwrap();
            assert_eq!(decoded.clone().into_credentials(), credentials, "{payload}");
            assert!(!decoded.hidden);
        }
    }

    #[test]
    fn encoding_is_deterministic() {
        let credentials = Credentials::secured("Lab-Guest", "p:a,s;s");
        let first = encode(&credentials).unwrap();
        for _ in 0..10 {
            assert_eq!(encode(&credentials).unwrap().as_bytes(), first.as_bytes());
        }
    }

    #[test]
    fn decode_accepts_any_field_order() {
        let decoded = decode(r"WIFI:S:My\;Net;H:true;P:pw;T:WPA;;").unwrap();
        assert_eq!(decoded.network_name, "My;Net");
        assert_eq!(decoded.secret, "pw");
        assert_eq!(decoded.auth, "WPA");
        assert!(decoded.hidden);
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert_eq!(decode("T:WPA;S:x;;"), Err(DecodeError::MissingPrefix));
        assert_eq!(decode("WIFI:T:WPA;S:x;"), Err(DecodeError::Unterminated));
        assert_eq!(decode(r"WIFI:S:x\"), Err(DecodeError::Unterminated));
        assert_eq!(decode("WIFI:T:WPA;;"), Err(DecodeError::MissingNetworkName));
        assert_eq!(decode("WIFI:T WPA;;"), Err(DecodeError::MalformedField(' ')));
        assert_eq!(
            decode("WIFI:S:x;;junk"),
            Err(DecodeError::TrailingData("junk".to_string()))
        );
    }
}
