//! Deterministic object key encoding
//!
//! The bucket namespace is split into three disjoint prefixes:
//!
//! ```text
//! data/<encoded path>/<seq>   one uploaded write, seq zero-padded to 20 digits
//! meta/index.json             the persisted version index (reserved)
//! meta/lease                  the replication lease object (reserved)
//! mirror/<encoded path>       full-tree backup walker uploads
//! ```
//!
//! Data keys are a pure function of `(path, sequence)`. A crashed run that
//! already uploaded an object re-derives the same key on replay, so the
//! retried put overwrites identical content instead of minting a duplicate.
//! Path encoding is injective (every byte outside the safe set becomes `%XX`),
//! so distinct logical paths can never collide, and no encoded path can
//! produce the `meta/` prefix.

/// Prefix for replicated write objects
pub const DATA_PREFIX: &str = "data/";

/// Reserved key for the persisted version index
pub const INDEX_KEY: &str = "meta/index.json";

/// Reserved key for the replication lease
pub const LEASE_KEY: &str = "meta/lease";

/// Prefix for the full-tree backup walker
pub const MIRROR_PREFIX: &str = "mirror/";

/// Width of the zero-padded sequence component
const SEQ_WIDTH: usize = 20;

/// Percent-encode a logical path into a single key segment
///
/// Keeps `[A-Za-z0-9._-]`; everything else (including `/`) becomes `%XX`.
pub fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                out.push(byte as char);
            }
            _ => {
                out.push('%');
                out.push_str(&format!("{:02X}", byte));
            }
        }
    }
    out
}

/// Reverse of `encode_path`; `None` if the segment is not valid encoding
pub fn decode_path(encoded: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(encoded.len());
    let mut chars = encoded.bytes();
    while let Some(b) = chars.next() {
        if b == b'%' {
            let hi = chars.next()?;
            let lo = chars.next()?;
            let hex = [hi, lo];
            let hex = std::str::from_utf8(&hex).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
        } else {
            bytes.push(b);
        }
    }
    String::from_utf8(bytes).ok()
}

/// Key under which the payload of `(path, sequence)` is stored
pub fn data_key(path: &str, sequence: u64) -> String {
    format!(
        "{}{}/{:0width$}",
        DATA_PREFIX,
        encode_path(path),
        sequence,
        width = SEQ_WIDTH
    )
}

/// Parse a data key back into `(path, sequence)`
///
/// Returns `None` for keys outside the data namespace or with an
/// unrecognized shape; the recovery rebuilder logs and skips those.
pub fn parse_data_key(key: &str) -> Option<(String, u64)> {
    let rest = key.strip_prefix(DATA_PREFIX)?;
    let (encoded, seq) = rest.rsplit_once('/')?;
    if seq.len() != SEQ_WIDTH || !seq.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let sequence = seq.parse().ok()?;
    let path = decode_path(encoded)?;
    Some((path, sequence))
}

/// Key for a backup walker upload of `path`
pub fn mirror_key(path: &str) -> String {
    format!("{}{}", MIRROR_PREFIX, encode_path(path))
}
