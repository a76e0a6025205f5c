use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};

/// Bytes in a record header: 4-byte timestamp plus 2-byte token length
pub const HEADER_LEN: usize = 6;

/// A device token the service could not deliver to, and when
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FeedbackRecord {
    timestamp: u32,
    #[serde(serialize_with = "serialize_hex")]
    token:     Vec<u8>,
}

impl FeedbackRecord {
    /// Creates a record from its decoded fields
    pub fn new<T: Into<Vec<u8>>>(timestamp: u32, token: T) -> Self {
        Self {
            timestamp,
            token: token.into(),
        }
    }

    /// Seconds since the Unix epoch of the failed delivery
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Failed delivery time
    pub fn date(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(u64::from(self.timestamp))
    }

    /// Device token as lowercase hex
    pub fn token(&self) -> String {
        hex::encode(&self.token)
    }

    /// Raw device token
    pub fn token_bytes(&self) -> &[u8] {
        &self.token
    }

    /// Wire encoding: big-endian timestamp, big-endian token length, token
    ///
    /// Returns `None` if the token is longer than the length field can carry.
    pub fn encode(&self) -> Option<Vec<u8>> {
        let len = u16::try_from(self.token.len()).ok()?;
        let mut out = Vec::with_capacity(HEADER_LEN + self.token.len());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&self.token);
        Some(out)
    }
}

fn serialize_hex<S: Serializer>(token: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_lowercase_hex() {
        let record = FeedbackRecord::new(0, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(record.token(), "deadbeef");
        assert_eq!(record.token_bytes(), &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_date_from_timestamp() {
        let record = FeedbackRecord::new(1_598_220_288, vec![0x01]);
        assert_eq!(
            record.date().duration_since(UNIX_EPOCH).unwrap(),
            Duration::from_secs(1_598_220_288)
        );
    }

    #[test]
    fn test_encode_layout() {
        let record = FeedbackRecord::new(1_597_640_704, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(
            record.encode().unwrap(),
            vec![0x5F, 0x3A, 0x10, 0x00, 0x00, 0x04, 0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[test]
    fn test_encode_rejects_oversized_token() {
        let record = FeedbackRecord::new(1, vec![0u8; u16::MAX as usize + 1]);
        assert!(record.encode().is_none());
    }

    #[test]
    fn test_serializes_token_as_hex() {
        let record = FeedbackRecord::new(42, vec![0xAB, 0xCD]);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, serde_json::json!({ "timestamp": 42, "token": "abcd" }));
    }
}
