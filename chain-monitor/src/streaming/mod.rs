//! Event streaming via Apache Iggy.
//!
//! This module provides real-time event broadcasting to clients via Apache Iggy,
//! a high-performance message streaming platform.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              Event Flow                                      │
//! │                                                                             │
//! │  ┌──────────────┐     ┌──────────────────┐     ┌──────────────────────────┐ │
//! │  │   Handlers   │────▶│  IggyPublisher   │────▶│     Apache Iggy          │ │
//! │  │  (events)    │     │  (serialize &    │     │  (stream + topics)       │ │
//! │  └──────────────┘     │   send)          │     └──────────────────────────┘ │
//! │                       └──────────────────┘                │                 │
//! │                                                           ▼                 │
//! │                                                  ┌─────────────────────┐    │
//! │                                                  │   WebSocket API     │    │
//! │                                                  │   (consumers)       │    │
//! │                                                  └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Topics
//!
//! Events are routed per-user rather than by domain: each embedded wallet's
//! owner gets a single topic (`user.<uuid>`) carrying every deposit,
//! withdrawal, and balance update for wallets they own. Events for a wallet
//! whose owner isn't known yet fall back to a `broadcast` topic. Topics are
//! created lazily, the first time a publish needs them.
//!
//! # Usage
//!
//! ```ignore
//! use chain_monitor::streaming::IggyPublisher;
//! use chain_monitor::config::IggySettings;
//!
//! // Create publisher from settings
//! let publisher = IggyPublisher::new(&settings.iggy)?;
//!
//! // Publish events
//! publisher.publish(&event).await?;
//!
//! // Batch publish
//! publisher.publish_batch(&events).await?;
//! ```

mod iggy_publisher;
mod topics;

pub use iggy_publisher::{IggyPublisher, NoOpPublisher};
pub use topics::{BROADCAST_TOPIC, STREAM_NAME, Topic, TopicConfig};
