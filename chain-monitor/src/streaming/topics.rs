//! Topic routing for activity event streaming.
//!
//! Unlike a fixed domain-categorized topic set, activity events are routed
//! per-user: each embedded wallet's owner subscribes to one topic and never
//! sees another user's deposits or withdrawals. Events with no known owner
//! (an activity for a wallet whose `user_id` backfill hasn't landed yet)
//! fall back to a single broadcast topic.

use uuid::Uuid;

use crate::types::events::ActivityEvent;

/// Default stream name for activity events (overridden by `IggySettings::stream_name`).
pub const STREAM_NAME: &str = "chain-monitor";

/// Catch-all topic name for events with no known owning user.
pub const BROADCAST_TOPIC: &str = "broadcast";

/// Topic an event is routed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Per-user topic, scoped to a single embedded wallet owner.
    User(Uuid),
    /// Catch-all topic for events with no known owner.
    Broadcast,
}

impl Topic {
    /// Topic name as used in Iggy.
    #[must_use]
    pub fn as_name(&self) -> String {
        match self {
            Self::User(id) => format!("user.{id}"),
            Self::Broadcast => BROADCAST_TOPIC.to_string(),
        }
    }

    /// Determine the topic an event routes to.
    #[must_use]
    pub fn for_event(event: &ActivityEvent) -> Self {
        event.user_id().map_or(Self::Broadcast, Self::User)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_name())
    }
}

/// Configuration for a topic at creation time.
#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// Topic name.
    pub name: String,
    /// Number of partitions.
    pub partitions: u32,
    /// Message retention in seconds (0 = unlimited).
    pub retention_secs: u64,
}

impl TopicConfig {
    /// Create a new topic config with defaults.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: 1,
            retention_secs: 86400 * 7, // 7 days
        }
    }

    /// Set the number of partitions.
    #[must_use]
    pub const fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions;
        self
    }

    /// Set the retention period in seconds.
    #[must_use]
    pub const fn with_retention_secs(mut self, secs: u64) -> Self {
        self.retention_secs = secs;
        self
    }
}

impl From<&Topic> for TopicConfig {
    fn from(topic: &Topic) -> Self {
        Self::new(topic.as_name())
    }
}
