//! Chat transport seam and notification fan-out.
//!
//! The engine never talks to a chat network directly: everything outbound goes
//! through [`ChatTransport`], and the production implementation posts to an
//! HTTP gateway. Fan-out to several destination channels is best-effort and
//! runs with bounded concurrency; a failed delivery is logged and never rolls
//! back a persisted transition nor blocks the remaining destinations.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::classifier::Team;

/// Reply-context payload handed back by the transport for a quoted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotedMessage {
    pub text: String,
    pub unique_id: Option<String>,
    pub original_id: Option<String>,
}

/// Outbound text, optionally carrying an opaque media blob as caption'd media.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: None,
        }
    }

    pub fn with_media(text: impl Into<String>, media: Option<String>) -> Self {
        Self {
            text: text.into(),
            media,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("delivery to {channel} failed: {reason}")]
    Delivery { channel: String, reason: String },
    #[error("gateway request failed: {0}")]
    Gateway(#[from] reqwest::Error),
}

/// The chat client the engine is plugged into. No cross-channel ordering is
/// assumed.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn deliver(&self, channel: &str, message: &OutboundMessage)
        -> Result<(), TransportError>;
}

/// Static channel topology: where each team's tickets go, plus the primary
/// monitoring channel.
#[derive(Debug, Clone)]
pub struct ChannelRouting {
    destinations: HashMap<Team, String>,
    primary_channel: String,
}

impl ChannelRouting {
    pub fn new(destinations: HashMap<Team, String>, primary_channel: String) -> Self {
        Self {
            destinations,
            primary_channel,
        }
    }

    pub fn destination(&self, team: Team) -> Option<&str> {
        self.destinations.get(&team).map(String::as_str)
    }

    pub fn primary_channel(&self) -> &str {
        &self.primary_channel
    }

    /// Reverse lookup: which team a destination channel belongs to. Used to
    /// attribute confirmations arriving in a team channel.
    pub fn team_for_channel(&self, channel: &str) -> Option<Team> {
        self.destinations
            .iter()
            .find(|(_, chan)| chan.as_str() == channel)
            .map(|(team, _)| *team)
    }

    /// Channels are group chats; anything else is a direct conversation.
    pub fn is_known_group(&self, channel: &str) -> bool {
        channel == self.primary_channel || self.team_for_channel(channel).is_some()
    }
}

/// How many deliveries a single fan-out runs at once.
const FAN_OUT_CONCURRENCY: usize = 4;

/// Deliver `message` to every channel in `channels`, bounded-concurrently,
/// collecting per-destination outcomes for logging. Returns the number of
/// successful deliveries.
pub async fn fan_out(
    transport: &dyn ChatTransport,
    channels: &[String],
    message: &OutboundMessage,
) -> usize {
    // Iterate owned strings: borrowing the slice items would tie each future
    // to the iteration borrow and break Send bounds on the callers.
    let outcomes: Vec<(String, Result<(), TransportError>)> = stream::iter(channels.to_vec())
        .map(|channel| async move {
            let result = transport.deliver(&channel, message).await;
            (channel, result)
        })
        .buffer_unordered(FAN_OUT_CONCURRENCY)
        .collect()
        .await;

    let mut delivered = 0;
    for (channel, outcome) in outcomes {
        match outcome {
            Ok(()) => delivered += 1,
            Err(e) => error!("notification to {channel} failed: {e}"),
        }
    }
    delivered
}

/// Production transport: posts deliveries to a chat gateway over HTTP.
/// Mirrors the send path of a hosted chat API.
pub struct HttpTransport {
    client: reqwest::Client,
    gateway_url: String,
}

#[derive(Serialize)]
struct GatewaySendRequest<'a> {
    channel: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<&'a str>,
}

impl HttpTransport {
    pub fn new(gateway_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            gateway_url: gateway_url.into(),
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn deliver(
        &self,
        channel: &str,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        let payload = GatewaySendRequest {
            channel,
            text: &message.text,
            media: message.media.as_deref(),
        };
        let response = self
            .client
            .post(format!("{}/messages", self.gateway_url))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Delivery {
                channel: channel.to_string(),
                reason: format!("gateway returned {}", response.status()),
            });
        }
        info!("delivered message to {channel}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Transport that records deliveries and can fail specific channels.
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<(String, String)>>,
        pub failing: Vec<String>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                failing: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn deliver(
            &self,
            channel: &str,
            message: &OutboundMessage,
        ) -> Result<(), TransportError> {
            if self.failing.iter().any(|c| c == channel) {
                return Err(TransportError::Delivery {
                    channel: channel.to_string(),
                    reason: "simulated outage".into(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((channel.to_string(), message.text.clone()));
            Ok(())
        }
    }

    fn routing() -> ChannelRouting {
        let mut destinations = HashMap::new();
        destinations.insert(Team::It, "it-group@g.us".to_string());
        destinations.insert(Team::Man, "man-group@g.us".to_string());
        ChannelRouting::new(destinations, "primary@g.us".to_string())
    }

    #[test]
    fn routing_reverse_lookup() {
        let routing = routing();
        assert_eq!(routing.team_for_channel("it-group@g.us"), Some(Team::It));
        assert_eq!(routing.team_for_channel("dm@c.us"), None);
        assert!(routing.is_known_group("primary@g.us"));
        assert!(!routing.is_known_group("dm@c.us"));
    }

    #[tokio::test]
    async fn fan_out_continues_past_failures() {
        let mut transport = RecordingTransport::new();
        transport.failing.push("man-group@g.us".to_string());

        let channels = vec![
            "it-group@g.us".to_string(),
            "man-group@g.us".to_string(),
            "primary@g.us".to_string(),
        ];
        let delivered = fan_out(
            &transport,
            &channels,
            &OutboundMessage::text("ticket cancelled"),
        )
        .await;

        assert_eq!(delivered, 2);
        let sent = transport.sent.lock().unwrap();
        let reached: Vec<_> = sent.iter().map(|(c, _)| c.as_str()).collect();
        assert!(reached.contains(&"it-group@g.us"));
        assert!(reached.contains(&"primary@g.us"));
        assert!(!reached.contains(&"man-group@g.us"));
    }
}
