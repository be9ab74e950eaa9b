//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the dice client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Seconds before an unanswered request is cancelled. `None` waits forever.
    pub request_timeout_secs: Option<u64>,
}

impl ClientConfig {
    /// Request timeout as a `Duration`, if any.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_wait_forever() {
        assert_eq!(ClientConfig::default().request_timeout(), None);
    }

    #[test]
    fn partial_json() {
        let cfg: ClientConfig = serde_json::from_value(json!({"request_timeout_secs": 10})).unwrap();
        assert_eq!(cfg.request_timeout(), Some(Duration::from_secs(10)));
        let empty: ClientConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty, ClientConfig::default());
    }
}
