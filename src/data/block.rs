//! Block and screenshot records

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Raw input counts accumulated over a block, for diagnostic display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCounts {
    pub keyboard: u64,
    pub mouse: u64,
    pub clicks: u64,
}

/// A captured screenshot, JPEG-encoded
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screenshot {
    /// JPEG bytes (base64 in JSON)
    #[serde(serialize_with = "to_base64", deserialize_with = "from_base64")]
    pub data: Vec<u8>,

    pub taken_at: DateTime<Utc>,

    pub width: u32,

    pub height: u32,

    /// Hex SHA-256 of `data`
    pub sha256: String,
}

impl Screenshot {
    pub fn new(data: Vec<u8>, width: u32, height: u32, taken_at: DateTime<Utc>) -> Self {
        let sha256 = hex::encode(Sha256::digest(&data));
        Self {
            data,
            taken_at,
            width,
            height,
            sha256,
        }
    }

    pub fn meta(&self) -> ScreenshotMeta {
        ScreenshotMeta {
            taken_at: self.taken_at,
            width: self.width,
            height: self.height,
            sha256: self.sha256.clone(),
        }
    }
}

impl std::fmt::Debug for Screenshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Screenshot")
            .field("bytes", &self.data.len())
            .field("taken_at", &self.taken_at)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sha256", &self.sha256)
            .finish()
    }
}

/// What remains of a screenshot once its pixels are dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenshotMeta {
    pub taken_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub sha256: String,
}

/// One fixed-length accounting unit of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// 1-based, increasing within a session
    pub block_number: u32,

    pub started_at: DateTime<Utc>,

    pub ended_at: DateTime<Utc>,

    pub duration_seconds: u64,

    /// 0-100, share of sampling windows with any input
    pub activity_percent: u8,

    #[serde(default)]
    pub activity: ActivityCounts,

    /// Screenshot pixels; absent when capture was declined, unavailable,
    /// not yet due, or stripped for the snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Screenshot>,

    /// Evidence that a screenshot was attached, kept after the pixels are stripped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_meta: Option<ScreenshotMeta>,

    /// Deliberately short final block
    #[serde(default)]
    pub is_partial: bool,

    /// Reconstructed without live observation
    #[serde(default)]
    pub is_missed: bool,
}

impl Block {
    /// Copy of this block without screenshot pixels
    pub fn redacted(&self) -> Self {
        Self {
            screenshot: None,
            ..self.clone()
        }
    }

    pub fn has_screenshot(&self) -> bool {
        self.screenshot.is_some()
    }
}

fn to_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}

fn from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn block_with_shot() -> Block {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let shot = Screenshot::new(vec![0xFF, 0xD8, 0xFF, 0xE0], 4, 3, at);
        Block {
            block_number: 1,
            started_at: at,
            ended_at: at + chrono::Duration::minutes(10),
            duration_seconds: 600,
            activity_percent: 80,
            activity: ActivityCounts {
                keyboard: 12,
                mouse: 40,
                clicks: 3,
            },
            screenshot_meta: Some(shot.meta()),
            screenshot: Some(shot),
            is_partial: false,
            is_missed: false,
        }
    }

    #[test]
    fn test_screenshot_digest_is_sha256_of_bytes() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let shot = Screenshot::new(b"abc".to_vec(), 1, 1, at);
        assert_eq!(
            shot.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_redacted_keeps_evidence_only() {
        let block = block_with_shot();
        let redacted = block.redacted();
        assert!(redacted.screenshot.is_none());
        assert_eq!(redacted.screenshot_meta, block.screenshot_meta);

        let json = serde_json::to_string(&redacted).unwrap();
        assert!(!json.contains("\"data\""));
        assert!(json.contains(&block.screenshot_meta.unwrap().sha256));
    }

    #[test]
    fn test_screenshot_bytes_are_base64_in_json() {
        let block = block_with_shot();
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["screenshot"]["data"], "/9j/4A==");

        let back: Block = serde_json::from_value(json).unwrap();
        assert_eq!(back, block);
    }
}
