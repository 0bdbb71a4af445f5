//! Block header announcements as pushed by `blockchain.headers.subscribe`.

use serde::{de, Deserialize, Deserializer};
use serde_json::Value;

use crate::error::WatchError;

/// One announced block. Servers send more fields (`hex`, …); only `height` is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BlockAnnouncement {
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub height: u64,
}

// Some servers send the height as a decimal string.
fn number_or_numeric_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Height {
        Number(u64),
        Text(String),
    }

    match Height::deserialize(deserializer)? {
        Height::Number(n) => Ok(n),
        Height::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid height {text:?}"))),
    }
}

/// Normalise a subscription payload into announcements.
///
/// The payload is either one header object or a list of them; a bare object
/// is a batch of one. List order is preserved.
pub fn parse_batch(payload: Value) -> Result<Vec<BlockAnnouncement>, WatchError> {
    let items = match payload {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(WatchError::MalformedAnnouncement(format!(
                "expected object or list, got {other}"
            )))
        }
    };

    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| WatchError::MalformedAnnouncement(e.to_string()))
        })
        .collect()
}
