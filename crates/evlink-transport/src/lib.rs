#![forbid(unsafe_code)]

//! Transport: ferries input events between a producer and a consumer
//! process over a local socket pair.
//!
//! # Role in evlink
//! `evlink-transport` is the plumbing between the window system's event
//! dispatcher and an application window. The dispatcher holds a
//! [`Publisher`], the application a [`Consumer`]; the two share a connected
//! `SOCK_SEQPACKET` pair wrapped in [`Channel`] endpoints.
//!
//! # Primary responsibilities
//! - **Message**: fixed-layout, size-validated wire framing with mandatory
//!   zero-fill sanitization on send.
//! - **Channel**: non-blocking datagram endpoint with capped socket
//!   buffers, readiness probing, and fd lifecycle.
//! - **Publisher**: typed encoders plus the acknowledgement/timeline
//!   back-channel.
//! - **Consumer**: per-device batching of move samples, frame-time driven
//!   draining with touch resampling, and chained acknowledgements so one
//!   finish call acks every coalesced sample.
//!
//! # How it fits in the system
//! Event values and the [`EventFactory`](evlink_core::EventFactory) seam
//! come from `evlink-core`; this crate moves them across the process
//! boundary and owns every protocol invariant along the way.
//!
//! # Example
//! ```
//! use evlink_core::event::{KeyAction, KeyEvent};
//! use evlink_core::DefaultEventFactory;
//! use evlink_transport::{Channel, Consumer, Publisher};
//! use std::sync::Arc;
//!
//! let (server, client) = Channel::pair("example channel")?;
//! let mut publisher = Publisher::new(Arc::new(server));
//! let mut consumer = Consumer::new(Arc::new(client));
//!
//! publisher.publish_key_event(1, &KeyEvent::new(KeyAction::Down, 30))?;
//!
//! let mut factory = DefaultEventFactory;
//! let (seq, _event) = consumer.consume(&mut factory, false, None)?;
//! consumer.send_finished_signal(seq, true)?;
//! # Ok::<(), evlink_transport::TransportError>(())
//! ```

pub mod channel;
pub mod consumer;
pub mod error;
pub mod message;
pub mod publisher;
mod resample;

pub use channel::{Channel, ConnectionToken};
pub use consumer::Consumer;
pub use error::{Result, TransportError};
pub use message::{Body, GraphicsTimeline, Message, MessageType, MotionBody, MAX_MESSAGE_SIZE};
pub use publisher::{ConsumerResponse, InputVerifier, Publisher, VerificationError};
