//! Flattens one parent cast and its decoded embeds into normalized rows.

use crate::decode::DecodedEmbeds;
use crate::error::DecodeError;
use crate::model::{CastHash, Embed, EmbedType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One normalized embed row, keyed by `(parent_hash, embed_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEmbedRow {
    pub parent_hash: Vec<u8>,
    pub parent_author_id: u64,
    /// Position of the embed in the parent's original list.
    pub embed_index: u16,
    pub embed_type: EmbedType,
    pub url: Option<String>,
    pub referenced_hash: Option<CastHash>,
    pub referenced_author_id: Option<u64>,
    /// Canonical JSON of the parent's whole embeds payload.
    pub raw_source: String,
    pub processed_at: DateTime<Utc>,
}

/// An element that produced no row.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementRejection {
    pub embed_index: usize,
    pub error: DecodeError,
}

/// Rows and rejections for a single parent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub rows: Vec<NormalizedEmbedRow>,
    pub rejected: Vec<ElementRejection>,
}

/// Projects decoded embeds into rows. Rejected slots leave a gap in
/// `embed_index` and are reported in [`Projection::rejected`].
pub fn project(
    parent_hash: &[u8],
    parent_author_id: u64,
    decoded: &DecodedEmbeds,
    raw_source: &str,
    processed_at: DateTime<Utc>,
) -> Projection {
    let mut projection = Projection::default();

    for (position, slot) in decoded.slots().iter().enumerate() {
        let embed = match slot {
            Ok(embed) => embed,
            Err(error) => {
                projection.rejected.push(ElementRejection {
                    embed_index: position,
                    error: error.clone(),
                });
                continue;
            }
        };

        let Ok(embed_index) = u16::try_from(position) else {
            projection.rejected.push(ElementRejection {
                embed_index: position,
                error: DecodeError::element(format!(
                    "embed position {position} exceeds the maximum index {}",
                    u16::MAX
                )),
            });
            continue;
        };

        let (url, referenced_hash, referenced_author_id) = match embed {
            Embed::Url(url) => (Some(url.clone()), None, None),
            Embed::CastQuote(reference) => {
                (None, Some(reference.cast_hash), Some(reference.author_id))
            }
        };

        projection.rows.push(NormalizedEmbedRow {
            parent_hash: parent_hash.to_vec(),
            parent_author_id,
            embed_index,
            embed_type: embed.embed_type(),
            url,
            referenced_hash,
            referenced_author_id,
            raw_source: raw_source.to_string(),
            processed_at,
        });
    }

    projection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{decode, RawEmbeds};
    use crate::error::DecodeErrorKind;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn project_text(text: &str) -> Projection {
        let decoded = decode(&RawEmbeds::from(text)).unwrap();
        let raw = decoded.canonical_json().to_string();
        project(&[9u8; 20], 42, &decoded, &raw, now())
    }

    #[test]
    fn mixed_list_emits_one_row_per_embed() {
        let hash_hex = hex::encode([3u8; 20]);
        let projection = project_text(&format!(
            "[{{'url': 'https://a.com'}}, {{'castId': {{'fid': 7, 'hash': '0x{hash_hex}'}}}}]"
        ));

        assert!(projection.rejected.is_empty());
        assert_eq!(projection.rows.len(), 2);

        let url_row = &projection.rows[0];
        assert_eq!(url_row.embed_index, 0);
        assert_eq!(url_row.embed_type, EmbedType::Url);
        assert_eq!(url_row.url.as_deref(), Some("https://a.com"));
        assert_eq!(url_row.referenced_hash, None);
        assert_eq!(url_row.referenced_author_id, None);

        let quote_row = &projection.rows[1];
        assert_eq!(quote_row.embed_index, 1);
        assert_eq!(quote_row.embed_type, EmbedType::CastReference);
        assert_eq!(quote_row.url, None);
        assert_eq!(quote_row.referenced_hash, Some(CastHash::new([3u8; 20])));
        assert_eq!(quote_row.referenced_author_id, Some(7));

        for row in &projection.rows {
            assert_eq!(row.parent_hash, vec![9u8; 20]);
            assert_eq!(row.parent_author_id, 42);
            assert_eq!(row.processed_at, now());
            assert_eq!(row.raw_source, projection.rows[0].raw_source);
        }
    }

    #[test]
    fn rejected_slots_leave_gaps() {
        let projection = project_text("[{'url': 'https://a.com'}, 17, {'url': 'https://b.com'}]");

        let indexes: Vec<_> = projection.rows.iter().map(|r| r.embed_index).collect();
        assert_eq!(indexes, vec![0, 2]);
        assert_eq!(projection.rejected.len(), 1);
        assert_eq!(projection.rejected[0].embed_index, 1);
        assert_eq!(projection.rejected[0].error.kind, DecodeErrorKind::ElementShapeInvalid);
    }

    #[test]
    fn empty_payload_projects_nothing() {
        let decoded = decode(&RawEmbeds::Absent).unwrap();
        let projection = project(&[1u8; 20], 1, &decoded, "[]", now());
        assert_eq!(projection, Projection::default());
    }

    #[test]
    fn positions_beyond_u16_are_rejected() {
        let count = usize::from(u16::MAX) + 2;
        let items = vec![serde_json::json!({"url": "https://x.com"}); count];
        let decoded = decode(&RawEmbeds::Structured(serde_json::Value::Array(items))).unwrap();
        let projection = project(&[1u8; 20], 1, &decoded, "[]", now());

        assert_eq!(projection.rows.len(), usize::from(u16::MAX) + 1);
        assert_eq!(projection.rejected.len(), 1);
        assert_eq!(projection.rejected[0].embed_index, count - 1);
        assert_eq!(projection.rejected[0].error.kind, DecodeErrorKind::ElementShapeInvalid);
    }
}
