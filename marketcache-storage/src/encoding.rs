//! Binary layout shared by the networked and durable tiers.
//!
//! Format: `[written_at millis: i64 LE][ttl millis: u64 LE][payload]`.

use chrono::DateTime;
use marketcache_core::{CacheEntry, CacheError, CacheResult, TierKind};
use std::time::Duration;

/// Size of the fixed metadata header.
pub const HEADER_LEN: usize = 16;

pub fn encode_entry(entry: &CacheEntry) -> Vec<u8> {
    let ttl_millis = u64::try_from(entry.ttl.as_millis()).unwrap_or(u64::MAX);

    let mut bytes = Vec::with_capacity(HEADER_LEN + entry.value.len());
    bytes.extend_from_slice(&entry.written_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&ttl_millis.to_le_bytes());
    bytes.extend_from_slice(&entry.value);
    bytes
}

/// Decode bytes read from `tier` under `key`.
pub fn decode_entry(bytes: &[u8], tier: TierKind, key: &str) -> CacheResult<CacheEntry> {
    let decoding = |reason: &str| CacheError::Decoding {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if bytes.len() < HEADER_LEN {
        return Err(decoding("entry shorter than header"));
    }

    let written_bytes: [u8; 8] = bytes[0..8]
        .try_into()
        .map_err(|_| decoding("invalid timestamp"))?;
    let ttl_bytes: [u8; 8] = bytes[8..16]
        .try_into()
        .map_err(|_| decoding("invalid ttl"))?;

    let written_at = DateTime::from_timestamp_millis(i64::from_le_bytes(written_bytes))
        .ok_or_else(|| decoding("timestamp out of range"))?;
    let ttl = Duration::from_millis(u64::from_le_bytes(ttl_bytes));

    Ok(CacheEntry::new(
        bytes[HEADER_LEN..].to_vec(),
        written_at,
        ttl,
        tier,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_decode_preserves_metadata_at_millisecond_precision() {
        let written_at = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();
        let entry = CacheEntry::new(
            b"{\"score\":70}".to_vec(),
            written_at,
            Duration::from_millis(90_500),
            TierKind::InProcess,
        );

        let decoded = decode_entry(&encode_entry(&entry), TierKind::Durable, "k").unwrap();

        assert_eq!(decoded.written_at, written_at);
        assert_eq!(decoded.ttl, Duration::from_millis(90_500));
        assert_eq!(decoded.value, entry.value);
        assert_eq!(decoded.tier, TierKind::Durable);
    }

    #[test]
    fn test_short_input_is_a_decoding_error() {
        let err = decode_entry(&[1, 2, 3], TierKind::Networked, "breakdown:BTCUSDT").unwrap_err();
        assert!(matches!(err, CacheError::Decoding { ref key, .. } if key == "breakdown:BTCUSDT"));
    }

    #[test]
    fn test_empty_payload_is_valid() {
        let entry = CacheEntry::new(Vec::new(), Utc::now(), Duration::ZERO, TierKind::Durable);
        let decoded = decode_entry(&encode_entry(&entry), TierKind::Durable, "k").unwrap();
        assert!(decoded.value.is_empty());
    }
}
