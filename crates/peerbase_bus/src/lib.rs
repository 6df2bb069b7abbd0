//! # Peerbase Bus
//!
//! Bounded in-process event bus for the Peerbase substrate.
//!
//! The bus moves immutable [`Event`] records from producers to consumers
//! through a fixed-capacity ring buffer drained by a pool of dispatch
//! workers. Backpressure is a feature: a full ring suspends the
//! (cooperative) publisher instead of buffering without bound.
//!
//! Two delivery surfaces exist side by side:
//!
//! - **Streams** - [`EventBus::subscribe`], [`EventBus::subscribe_types`],
//!   and [`EventBus::subscribe_filtered`] return [`EventStream`]s fed from
//!   a shared broadcast channel.
//! - **Registered handlers** - [`EventBus::register_subscriber`] installs
//!   explicit `(event type, priority, handler)` bindings; each event's
//!   eligible handlers run in descending priority order, with failures
//!   isolated per handler.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use peerbase_bus::{BusConfig, Event, EventBus, Priority};
//!
//! let bus = EventBus::new(BusConfig::default())?;
//! bus.initialize()?;
//!
//! let mut messages = bus.subscribe("social.message");
//! bus.publish(Event::new("social.message.text", "chat"), Priority::NORMAL).await?;
//!
//! if let Some(event) = messages.recv().await {
//!     println!("got {}", event.event_type());
//! }
//!
//! bus.shutdown().await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bus;
mod config;
mod dispatch;
mod envelope;
mod error;
mod event;
mod registry;
mod ring;
mod stats;
mod subscribe;

pub use bus::{BusState, EventBus};
pub use config::BusConfig;
pub use error::{BusError, BusResult, HandlerError};
pub use event::{Event, EventId, EventType, Priority};
pub use registry::{EventBinding, EventHandler, SubscriberId, SubscriberRegistry};
pub use stats::BusStatsSnapshot;
pub use subscribe::EventStream;
