#![forbid(unsafe_code)]

//! Publisher: the producing end of a channel.
//!
//! A [`Publisher`] encodes typed event values into wire messages and sends
//! them on its channel, and reads back the consumer's responses: finished
//! acknowledgements and frame-timeline reports.
//!
//! Every published event carries a producer-chosen non-zero `seq`; the
//! matching [`ConsumerResponse::Finished`] eventually returns it. A full
//! socket surfaces as `WouldBlock`, which upstream treats as backpressure:
//! it reschedules the publish instead of dropping the event.

use std::sync::Arc;

use evlink_core::event::{CaptureEvent, DragEvent, FocusEvent, KeyEvent, Nanos, TouchModeEvent};
use evlink_core::motion::{MotionEvent, Pointer, MAX_POINTERS};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::channel::Channel;
use crate::error::{Result, TransportError};
use crate::message::{Body, GraphicsTimeline, Message, MotionBody};

/// A malformed-stream report from an [`InputVerifier`].
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct VerificationError(pub String);

/// Opaque motion-stream checker run before motion events are published.
///
/// A rejection means the upstream dispatcher produced an inconsistent
/// stream; the publisher treats that as a fatal bug rather than an I/O
/// error.
pub trait InputVerifier {
    /// Inspect one motion sample in stream order.
    fn process_movement(
        &mut self,
        device_id: i32,
        source: evlink_core::Source,
        action: u32,
        pointers: &[Pointer],
        flags: u32,
    ) -> std::result::Result<(), VerificationError>;
}

/// A response read back from the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerResponse {
    /// The consumer finished processing an event.
    Finished {
        /// Seq of the published event being acknowledged.
        seq: u32,
        /// Whether the application handled it.
        handled: bool,
        /// When the consumer first read the event off the socket.
        consume_time: Nanos,
    },
    /// The consumer reported frame production times for an event.
    Timeline {
        /// The input event the timestamps belong to.
        input_event_id: i32,
        timeline: GraphicsTimeline,
    },
}

/// The producing end of a channel.
pub struct Publisher {
    channel: Arc<Channel>,
    verifier: Option<Box<dyn InputVerifier>>,
}

impl Publisher {
    /// Create a publisher on `channel` with verification disabled.
    #[must_use]
    pub fn new(channel: Arc<Channel>) -> Self {
        Self {
            channel,
            verifier: None,
        }
    }

    /// Install a stream verifier; every motion event is checked before it
    /// is sent.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Box<dyn InputVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// The channel this publisher writes to.
    #[must_use]
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Publish a key event under `seq`.
    pub fn publish_key_event(&mut self, seq: u32, event: &KeyEvent) -> Result<()> {
        trace!(
            channel = %self.channel.name(),
            seq,
            key_code = event.key_code,
            action = ?event.action,
            "publish key event"
        );
        self.check_seq(seq)?;
        self.channel.send(&Message {
            seq,
            body: Body::Key(event.clone()),
        })
    }

    /// Publish the newest sample of a motion event under `seq`.
    ///
    /// Historical samples are a consumer-side construct and are not
    /// transmitted; the dispatcher publishes one message per sample.
    ///
    /// # Panics
    ///
    /// Panics when an installed [`InputVerifier`] rejects the stream; an
    /// inconsistent outbound stream is a dispatcher bug.
    pub fn publish_motion_event(&mut self, seq: u32, event: &MotionEvent) -> Result<()> {
        trace!(
            channel = %self.channel.name(),
            seq,
            device_id = event.device_id,
            action = ?event.masked_action(),
            pointer_count = event.pointer_count(),
            "publish motion event"
        );
        self.check_seq(seq)?;
        let pointer_count = event.pointer_count();
        if pointer_count < 1 || pointer_count > MAX_POINTERS {
            warn!(
                channel = %self.channel.name(),
                pointer_count,
                "invalid number of pointers provided"
            );
            return Err(TransportError::BadValue);
        }

        let body = MotionBody::from_event(event);
        if let Some(verifier) = self.verifier.as_mut() {
            if let Err(err) = verifier.process_movement(
                body.device_id,
                body.source,
                body.action,
                &body.pointers,
                body.flags,
            ) {
                panic!("bad stream: {err}");
            }
        }

        self.channel.send(&Message {
            seq,
            body: Body::Motion(body),
        })
    }

    /// Publish a focus event under `seq`.
    pub fn publish_focus_event(&mut self, seq: u32, event: &FocusEvent) -> Result<()> {
        trace!(
            channel = %self.channel.name(),
            seq,
            has_focus = event.has_focus,
            "publish focus event"
        );
        self.check_seq(seq)?;
        self.channel.send(&Message {
            seq,
            body: Body::Focus(*event),
        })
    }

    /// Publish a pointer-capture event under `seq`.
    pub fn publish_capture_event(&mut self, seq: u32, event: &CaptureEvent) -> Result<()> {
        trace!(
            channel = %self.channel.name(),
            seq,
            pointer_capture_enabled = event.pointer_capture_enabled,
            "publish capture event"
        );
        self.check_seq(seq)?;
        self.channel.send(&Message {
            seq,
            body: Body::Capture(*event),
        })
    }

    /// Publish a drag event under `seq`.
    pub fn publish_drag_event(&mut self, seq: u32, event: &DragEvent) -> Result<()> {
        trace!(
            channel = %self.channel.name(),
            seq,
            x = event.x,
            y = event.y,
            is_exiting = event.is_exiting,
            "publish drag event"
        );
        self.check_seq(seq)?;
        self.channel.send(&Message {
            seq,
            body: Body::Drag(*event),
        })
    }

    /// Publish a touch-mode event under `seq`.
    pub fn publish_touch_mode_event(&mut self, seq: u32, event: &TouchModeEvent) -> Result<()> {
        trace!(
            channel = %self.channel.name(),
            seq,
            is_in_touch_mode = event.is_in_touch_mode,
            "publish touch mode event"
        );
        self.check_seq(seq)?;
        self.channel.send(&Message {
            seq,
            body: Body::TouchMode(*event),
        })
    }

    /// Read one consumer response (finished or timeline).
    ///
    /// Any other message type on this direction of the channel is a
    /// protocol violation and surfaces as
    /// [`TransportError::UnexpectedMessage`].
    pub fn receive_consumer_response(&mut self) -> Result<ConsumerResponse> {
        let msg = self.channel.receive().inspect_err(|err| {
            if *err != TransportError::WouldBlock {
                debug!(channel = %self.channel.name(), %err, "receive consumer response");
            }
        })?;
        match msg.body {
            Body::Finished(finished) => {
                trace!(
                    channel = %self.channel.name(),
                    seq = msg.seq,
                    handled = finished.handled,
                    "finished"
                );
                Ok(ConsumerResponse::Finished {
                    seq: msg.seq,
                    handled: finished.handled,
                    consume_time: finished.consume_time,
                })
            }
            Body::Timeline(timeline) => {
                trace!(
                    channel = %self.channel.name(),
                    input_event_id = timeline.event_id,
                    "timeline"
                );
                Ok(ConsumerResponse::Timeline {
                    input_event_id: timeline.event_id,
                    timeline: timeline.timeline,
                })
            }
            other => {
                warn!(
                    channel = %self.channel.name(),
                    message_type = ?other.message_type(),
                    "received unexpected message from consumer"
                );
                Err(TransportError::UnexpectedMessage)
            }
        }
    }

    fn check_seq(&self, seq: u32) -> Result<()> {
        if seq == 0 {
            warn!(
                channel = %self.channel.name(),
                "attempted to publish an event with sequence number 0"
            );
            return Err(TransportError::BadValue);
        }
        Ok(())
    }
}
