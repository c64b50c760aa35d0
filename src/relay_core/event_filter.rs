//! Decides whether a relay event is a qualifying reaction to the tracked note.

use super::types::{is_repost_kind, RawEvent, KIND_REPOST, KIND_TEXT_NOTE};
use crate::short_id;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Event kinds that may carry the reaction.
    pub accepted_kinds: Vec<u16>,
    /// Tag names whose value may point at the tracked note.
    pub reference_tags: Vec<String>,
    /// Only accept reactions with accompanying text.
    pub require_comment: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            accepted_kinds: vec![KIND_TEXT_NOTE, KIND_REPOST],
            reference_tags: vec!["e".to_string(), "q".to_string()],
            require_comment: false,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("event {event_id} references the note but has no author pubkey")]
    EmptyActor { event_id: String },
    #[error("event from {actor} references the note but has no event id")]
    EmptyEventId { actor: String },
    #[error("event {event_id} has a '{tag}' tag with no value")]
    MalformedTag { event_id: String, tag: String },
}

/// A reaction that earned a payment check.
#[derive(Debug, Clone, PartialEq)]
pub struct QualifyingEvent {
    pub actor_id: String,
    pub target_post_id: String,
    pub payload_text: String,
    pub event_id: String,
    pub kind: u16,
    pub observed_at: DateTime<Utc>,
}

impl QualifyingEvent {
    /// Repost content is the embedded original note, never a comment.
    pub fn has_comment(&self) -> bool {
        !is_repost_kind(self.kind) && !self.payload_text.trim().is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct EventFilter {
    target_post_id: String,
    config: FilterConfig,
}

impl EventFilter {
    pub fn new(target_post_id: impl Into<String>, config: FilterConfig) -> Self {
        Self {
            target_post_id: target_post_id.into(),
            config,
        }
    }

    pub fn target_post_id(&self) -> &str {
        &self.target_post_id
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Match one event. Malformed events are logged and dropped.
    pub fn matches(&self, event: &RawEvent) -> Option<QualifyingEvent> {
        match self.try_match(event) {
            Ok(hit) => hit,
            Err(e) => {
                log::warn!("⚠️  Dropping malformed event: {}", e);
                None
            }
        }
    }

    /// Like [`EventFilter::matches`] but surfaces why a malformed event was rejected.
    pub fn try_match(&self, event: &RawEvent) -> Result<Option<QualifyingEvent>, FilterError> {
        if !self.config.accepted_kinds.contains(&event.kind) {
            return Ok(None);
        }

        let mut references_target = false;
        let mut empty_tag = None;

        for name in &self.config.reference_tags {
            for tag in event.tags_named(name) {
                match tag.get(1) {
                    Some(value) if value.eq_ignore_ascii_case(&self.target_post_id) => {
                        references_target = true;
                    }
                    Some(value) if !value.is_empty() => {}
                    _ => empty_tag = Some(name.clone()),
                }
            }
        }

        if !references_target {
            return match empty_tag {
                Some(tag) => Err(FilterError::MalformedTag {
                    event_id: event.id.clone(),
                    tag,
                }),
                None => Ok(None),
            };
        }

        let actor_id = event.pubkey.trim();
        if actor_id.is_empty() {
            return Err(FilterError::EmptyActor {
                event_id: event.id.clone(),
            });
        }
        if event.id.trim().is_empty() {
            return Err(FilterError::EmptyEventId {
                actor: actor_id.to_string(),
            });
        }

        let hit = QualifyingEvent {
            actor_id: actor_id.to_string(),
            target_post_id: self.target_post_id.clone(),
            payload_text: event.content.clone(),
            event_id: event.id.clone(),
            kind: event.kind,
            observed_at: Utc::now(),
        };

        if self.config.require_comment && !hit.has_comment() {
            log::debug!(
                "Ignoring comment-less reaction {} from {}",
                short_id(&hit.event_id),
                short_id(&hit.actor_id)
            );
            return Ok(None);
        }

        Ok(Some(hit))
    }
}
