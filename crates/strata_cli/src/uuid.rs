//! UUID string helpers for the command line.
//!
//! Only the canonical 36-character hyphenated form is accepted; device
//! UUIDs come from driver info dumps which print them exactly that way.

/// Byte offsets of the hyphens in the canonical form.
const HYPHENS: [usize; 4] = [8, 13, 18, 23];

/// Formats a 16-byte UUID in the canonical hyphenated form.
pub fn uuid_to_hex_string(uuid: &[u8; 16]) -> String {
    let hex = hex::encode(uuid);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Parses a canonical 36-character hyphenated UUID.
pub fn parse_uuid(text: &str) -> Option<[u8; 16]> {
    if text.len() != 36 {
        return None;
    }
    let bytes = text.as_bytes();
    if HYPHENS.iter().any(|&i| bytes[i] != b'-') {
        return None;
    }
    let digits: String = text.chars().filter(|c| *c != '-').collect();
    let decoded = hex::decode(digits).ok()?;
    decoded.try_into().ok()
}
