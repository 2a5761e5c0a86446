//! Canonical embed model.
//!
//! These types are the strict side of the decoder: anything that reaches them
//! has already been validated, so the "neither or both populated" state of the
//! raw data cannot be represented here.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length in bytes of a cast hash.
pub const CAST_HASH_LEN: usize = 20;

/// A 20-byte cast hash.
///
/// Serializes as a `0x`-prefixed lowercase hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CastHash([u8; CAST_HASH_LEN]);

impl CastHash {
    pub fn new(bytes: [u8; CAST_HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Builds a hash from a byte slice, returning the actual length on mismatch.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, usize> {
        <[u8; CAST_HASH_LEN]>::try_from(bytes)
            .map(Self)
            .map_err(|_| bytes.len())
    }

    pub fn as_bytes(&self) -> &[u8; CAST_HASH_LEN] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for CastHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CastHash({})", self.to_hex())
    }
}

impl fmt::Display for CastHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for CastHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| format!("invalid hex hash: {e}"))?;
        Self::from_slice(&bytes)
            .map_err(|len| format!("hash must be exactly 20 bytes, got {len}"))
    }
}

impl Serialize for CastHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CastHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Reference to another cast (a quote).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CastReference {
    /// FID of the quoted cast's author.
    #[serde(rename = "fid")]
    pub author_id: u64,
    #[serde(rename = "hash")]
    pub cast_hash: CastHash,
}

/// A single embed attached to a cast.
///
/// Serializes to the canonical on-disk shape: `{"url": "..."}` or
/// `{"castId": {"fid": 1, "hash": "0x..."}}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Embed {
    /// A web URL or a chain-asset URI.
    #[serde(rename = "url")]
    Url(String),
    /// A quote of another cast.
    #[serde(rename = "castId")]
    CastQuote(CastReference),
}

impl Embed {
    pub fn embed_type(&self) -> EmbedType {
        match self {
            Self::Url(_) => EmbedType::Url,
            Self::CastQuote(_) => EmbedType::CastReference,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Url(url) => Some(url),
            Self::CastQuote(_) => None,
        }
    }

    pub fn reference(&self) -> Option<&CastReference> {
        match self {
            Self::Url(_) => None,
            Self::CastQuote(reference) => Some(reference),
        }
    }
}

/// Stored discriminator for a normalized embed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedType {
    Url,
    CastReference,
}

impl EmbedType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::CastReference => "cast_reference",
        }
    }
}

impl fmt::Display for EmbedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbedType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "url" => Ok(Self::Url),
            "cast_reference" => Ok(Self::CastReference),
            other => Err(format!("unknown embed type: {other}")),
        }
    }
}

/// Ordered, immutable list of embeds for one cast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbedList(Vec<Embed>);

impl EmbedList {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Embed> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Embed> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Embed] {
        &self.0
    }

    /// Canonical well-formed JSON text for this list.
    pub fn to_json_string(&self) -> String {
        // Serializing plain strings, integers and hex text cannot fail.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }
}

impl From<Vec<Embed>> for EmbedList {
    fn from(embeds: Vec<Embed>) -> Self {
        Self(embeds)
    }
}

impl FromIterator<Embed> for EmbedList {
    fn from_iter<I: IntoIterator<Item = Embed>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a EmbedList {
    type Item = &'a Embed;
    type IntoIter = std::slice::Iter<'a, Embed>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(seed: u8) -> CastHash {
        CastHash::new([seed; CAST_HASH_LEN])
    }

    #[test]
    fn cast_hash_rejects_wrong_length() {
        assert_eq!(CastHash::from_slice(&[0u8; 19]), Err(19));
        assert_eq!(CastHash::from_slice(&[0u8; 21]), Err(21));
        assert!(CastHash::from_slice(&[0u8; 20]).is_ok());
    }

    #[test]
    fn cast_hash_hex_round_trip() {
        let h = hash(0xab);
        let parsed: CastHash = h.to_hex().parse().unwrap();
        assert_eq!(parsed, h);
        assert!(h.to_hex().starts_with("0xabab"));
    }

    #[test]
    fn embed_serializes_to_canonical_shape() {
        let list = EmbedList::from(vec![
            Embed::Url("https://example.com".to_string()),
            Embed::CastQuote(CastReference {
                author_id: 7,
                cast_hash: hash(1),
            }),
        ]);

        let json: serde_json::Value = serde_json::from_str(&list.to_json_string()).unwrap();
        assert_eq!(json[0]["url"], "https://example.com");
        assert_eq!(json[1]["castId"]["fid"], 7);
        assert_eq!(
            json[1]["castId"]["hash"],
            "0x0101010101010101010101010101010101010101"
        );
    }

    #[test]
    fn embed_type_names() {
        assert_eq!(Embed::Url("x".into()).embed_type().as_str(), "url");
        assert_eq!(EmbedType::CastReference.to_string(), "cast_reference");
        assert_eq!("cast_reference".parse::<EmbedType>(), Ok(EmbedType::CastReference));
        assert!("cast_id".parse::<EmbedType>().is_err());
    }
}
