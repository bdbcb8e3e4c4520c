//! Prometheus metrics for the messaging surface.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

pub const CHANNEL_USER: &str = "user";
pub const CHANNEL_CONVERSATION: &str = "conversation";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PushLabels {
    pub channel: String,
}

pub struct Metrics {
    registry: Registry,
    pub messages_sent: Counter,
    pub messages_rate_limited: Counter,
    pub conversations_created: Counter,
    pub push_events: Family<PushLabels, Counter>,
    pub ws_sessions_active: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("rusty_estate");

        let messages_sent = Counter::default();
        registry.register("messages_sent", "Messages accepted and stored", messages_sent.clone());

        let messages_rate_limited = Counter::default();
        registry.register(
            "messages_rate_limited",
            "Sends rejected by the per-sender window",
            messages_rate_limited.clone(),
        );

        let conversations_created = Counter::default();
        registry.register(
            "conversations_created",
            "Conversations opened by find-or-create",
            conversations_created.clone(),
        );

        let push_events = Family::<PushLabels, Counter>::default();
        registry.register(
            "push_events",
            "Push frames handed to live sessions",
            push_events.clone(),
        );

        let ws_sessions_active = Gauge::default();
        registry.register(
            "ws_sessions_active",
            "Open push channel sessions",
            ws_sessions_active.clone(),
        );

        Self {
            registry,
            messages_sent,
            messages_rate_limited,
            conversations_created,
            push_events,
            ws_sessions_active,
        }
    }

    pub fn record_push(&self, channel: &str, receivers: usize) {
        if receivers == 0 {
            return;
        }
        self.push_events
            .get_or_create(&PushLabels { channel: channel.to_string() })
            .inc_by(receivers as u64);
    }

    /// OpenMetrics text exposition.
    pub fn render(&self) -> Result<String, std::fmt::Error> {
        let mut out = String::new();
        encode(&mut out, &self.registry)?;
        Ok(out)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
