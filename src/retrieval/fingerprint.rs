//! Content fingerprints used to merge the same passage seen by both
//! retrieval paths

use crate::config::RetrievalConfig;

/// How much of a passage's text identifies it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FingerprintMode {
    /// Hash of the whole whitespace-normalized text
    #[default]
    Full,
    /// Hash of the first N characters of the normalized text
    Prefix(usize),
}

impl FingerprintMode {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        match config.fingerprint.as_str() {
            "prefix" => FingerprintMode::Prefix(config.prefix_len),
            _ => FingerprintMode::Full,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Fingerprint `text` under `mode`
///
/// Runs of whitespace collapse to a single space before hashing, so the same
/// chunk text reformatted by a different path still merges.
pub fn fingerprint(text: &str, mode: FingerprintMode) -> Fingerprint {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");

    let hashed: &str = match mode {
        FingerprintMode::Full => &normalized,
        FingerprintMode::Prefix(len) => match normalized.char_indices().nth(len) {
            Some((byte_idx, _)) => &normalized[..byte_idx],
            None => &normalized,
        },
    };

    Fingerprint(*blake3::hash(hashed.as_bytes()).as_bytes())
}
