//! Embedder-supplied configuration (SPEC_FULL §6).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::model::IceServer;

/// Whether ICE candidate gathering is allowed to use any candidate type,
/// or is restricted to relay (TURN) candidates only (SPEC_FULL §6
/// `Options::iceTransportPolicy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IceTransportPolicy {
    #[default]
    All,
    Relay,
}

/// Static client identification sent with the `join` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub sdk: String,
    pub sdk_version: String,
    pub os: String,
    pub os_version: String,
    pub device_model: String,
    pub protocol: u32,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            sdk: "rust".to_owned(),
            sdk_version: env!("CARGO_PKG_VERSION").to_owned(),
            os: std::env::consts::OS.to_owned(),
            os_version: String::new(),
            device_model: String::new(),
            protocol: 15,
        }
    }
}

/// Top-level options passed to [`crate::engine::SessionEngine::connect`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Base signaling URL, e.g. `wss://sfu.example.com/rtc`.
    pub url: Url,
    /// Access token presented as a query parameter / auth header.
    pub token: String,
    /// Extra ICE servers layered in front of the server-advertised ones.
    pub ice_servers: Vec<IceServer>,
    /// Restricts ICE candidate gathering to relay-only when `Relay`.
    pub ice_transport_policy: IceTransportPolicy,
    pub client_info: ClientInfo,
    /// Auto-subscribe to tracks published by remote participants.
    pub auto_subscribe: bool,
    /// Use adaptive simulcast layer / resolution selection on subscribed
    /// video tracks. Consumed by the embedder's rendering stack, which is
    /// out of scope for this crate; the engine only carries the flag
    /// through (SPEC_FULL §6).
    pub adaptive_stream: bool,
    /// Restricts local publishing to a single named track source, when
    /// non-empty (SPEC_FULL §6 `Options::publish`).
    pub publish: String,
    /// Number of missed pings tolerated before the session is declared
    /// dead (SPEC_FULL §4.3.3).
    pub max_missed_pings: u32,
    /// Upper bound on consecutive reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before each reconnect/resume attempt (SPEC_FULL §4.3
    /// lifecycle step 4, §8 scenario 4).
    pub reconnect_attempt_delay: Duration,
    /// Coalescing window for throttled publisher renegotiation requests
    /// (SPEC_FULL §4.2 "Negotiation throttling").
    pub negotiation_delay: Duration,
}

impl Options {
    /// Builds the full signaling connection URL by appending the join
    /// query parameters. A resume attempt appends `reconnect=1` and the
    /// prior local participant sid (SPEC_FULL §6).
    #[must_use]
    pub fn signaling_url(&self, resume_participant_sid: Option<&str>) -> Url {
        let mut url = self.url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("access_token", &self.token);
            pairs.append_pair("auto_subscribe", if self.auto_subscribe { "1" } else { "0" });
            if let Some(sid) = resume_participant_sid {
                pairs.append_pair("reconnect", "1");
                pairs.append_pair("sid", sid);
            }
        }
        url
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            url: Url::parse("ws://localhost").expect("static URL parses"),
            token: String::new(),
            ice_servers: Vec::new(),
            ice_transport_policy: IceTransportPolicy::All,
            client_info: ClientInfo::default(),
            auto_subscribe: true,
            adaptive_stream: true,
            publish: String::new(),
            max_missed_pings: 2,
            max_reconnect_attempts: 10,
            reconnect_attempt_delay: Duration::from_secs(1),
            negotiation_delay: Duration::from_millis(100),
        }
    }
}
