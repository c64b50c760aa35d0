//! Wire shapes for NIP-01 relay traffic.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Plain text note.
pub const KIND_TEXT_NOTE: u16 = 1;
/// NIP-18 repost of a kind 1 note.
pub const KIND_REPOST: u16 = 6;
/// NIP-18 generic repost.
pub const KIND_GENERIC_REPOST: u16 = 16;

/// An event as delivered by a relay.
///
/// Fields default to empty instead of failing deserialization so that a
/// half-formed event still reaches the filter and is rejected there with a
/// precise reason.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub pubkey: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub kind: u16,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sig: String,
}

impl RawEvent {
    /// Tags whose first element equals `name`.
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Vec<String>> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
    }
}

/// Repost kinds embed the reposted note as content.
pub fn is_repost_kind(kind: u16) -> bool {
    matches!(kind, KIND_REPOST | KIND_GENERIC_REPOST)
}

/// Relay → client frames we act on.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event { subscription_id: String, event: RawEvent },
    /// An `EVENT` frame whose event object does not fit [`RawEvent`].
    MalformedEvent { subscription_id: String, reason: String },
    EndOfStoredEvents { subscription_id: String },
    Notice(String),
    Closed { subscription_id: String, reason: String },
    Ok { event_id: String, accepted: bool, message: String },
}

/// Parse one text frame. Returns `None` for frames that are not valid JSON
/// arrays or carry an unknown verb.
pub fn parse_relay_message(text: &str) -> Option<RelayMessage> {
    let value: Value = serde_json::from_str(text).ok()?;
    let frame = value.as_array()?;
    let verb = frame.first()?.as_str()?;
    let str_at = |idx: usize| frame.get(idx).and_then(Value::as_str).unwrap_or_default().to_string();

    match verb {
        "EVENT" => match serde_json::from_value(frame.get(2).cloned().unwrap_or(Value::Null)) {
            Ok(event) => Some(RelayMessage::Event {
                subscription_id: str_at(1),
                event,
            }),
            Err(e) => Some(RelayMessage::MalformedEvent {
                subscription_id: str_at(1),
                reason: e.to_string(),
            }),
        },
        "EOSE" => Some(RelayMessage::EndOfStoredEvents {
            subscription_id: str_at(1),
        }),
        "NOTICE" => Some(RelayMessage::Notice(str_at(1))),
        "CLOSED" => Some(RelayMessage::Closed {
            subscription_id: str_at(1),
            reason: str_at(2),
        }),
        "OK" => Some(RelayMessage::Ok {
            event_id: str_at(1),
            accepted: frame.get(2).and_then(Value::as_bool).unwrap_or(false),
            message: str_at(3),
        }),
        _ => None,
    }
}

/// Server-side narrowing sent with `REQ`.
///
/// Relays AND the conditions inside one filter object, so each reference tag
/// gets its own object and the relay ORs them.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionFilter {
    pub kinds: Vec<u16>,
    pub reference_tags: Vec<String>,
    pub target_post_id: String,
}

impl SubscriptionFilter {
    pub fn to_filters(&self) -> Vec<Value> {
        self.reference_tags
            .iter()
            .map(|tag| {
                let mut filter = json!({ "kinds": self.kinds });
                filter[format!("#{}", tag)] = json!([self.target_post_id]);
                filter
            })
            .collect()
    }
}

pub fn req_frame(subscription_id: &str, filter: &SubscriptionFilter) -> String {
    let mut frame = vec![json!("REQ"), json!(subscription_id)];
    frame.extend(filter.to_filters());
    Value::Array(frame).to_string()
}

pub fn close_frame(subscription_id: &str) -> String {
    json!(["CLOSE", subscription_id]).to_string()
}
