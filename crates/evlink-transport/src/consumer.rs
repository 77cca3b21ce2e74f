#![forbid(unsafe_code)]

//! Consumer: the receiving end of a channel.
//!
//! [`Consumer::consume`] drives one step of the receive state machine. Most
//! message kinds turn into exactly one delivered [`InputEvent`]; pointer
//! *move* samples instead accumulate into per-`{device, source}` batches so
//! that the application sees at most one motion event per display frame,
//! with the intermediate samples preserved as history on that event (and,
//! when resampling is on, one synthetic trailing sample aligned to frame
//! time).
//!
//! # Acknowledgement
//!
//! Every received message is acknowledged by seq. When samples coalesce
//! into one delivered event, each folded sample records a chain edge to its
//! predecessor; [`Consumer::send_finished_signal`] for the delivered seq
//! walks the chain and acks every folded sample, oldest first, before the
//! terminal seq itself. A send failure mid-chain restores the un-acked
//! edges so that a retry replays the remainder.
//!
//! # Invariants
//!
//! 1. Motion samples for a given `{device, source}` are never reordered.
//! 2. Non-movement events are delivered in arrival order, independent of
//!    any batch in progress.
//! 3. A seq is acked at most once, with the consume time recorded when its
//!    message was first read from the socket.
//!
//! Misuse that would break these silently — acking a seq twice, a producer
//! reusing a live seq, a finished/timeline message arriving here — panics.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use evlink_core::event::{InputEvent, Nanos};
use evlink_core::factory::EventFactory;
use evlink_core::motion::{MotionAction, MotionEvent, PointerCoords};
use evlink_core::Source;
use nix::time::{clock_gettime, ClockId};
use tracing::{trace, warn};

use crate::channel::Channel;
use crate::error::{Result, TransportError};
use crate::message::{Body, FinishedBody, GraphicsTimeline, Message, MotionBody, TimelineBody};
use crate::resample::{resample_touch_state, rewrite_message, TouchState, RESAMPLE_LATENCY};

/// Set to `0` to disable touch resampling for consumers constructed with
/// [`Consumer::new`]. Resampling is on by default; hardware whose touch
/// controller already ticks with the display does not need it.
pub const RESAMPLING_ENV_VAR: &str = "EVLINK_RESAMPLING";

/// One queued motion sample, keyed by the seq that must eventually be acked.
#[derive(Debug, Clone)]
struct BatchSample {
    seq: u32,
    motion: MotionBody,
}

/// A run of compatible motion samples awaiting a frame.
#[derive(Debug, Clone)]
struct Batch {
    samples: Vec<BatchSample>,
}

/// An ack-coalescence edge: `seq` travels with the ack of `chain`.
#[derive(Debug, Clone, Copy)]
struct SeqChain {
    seq: u32,
    chain: u32,
}

/// The receiving end of a channel.
pub struct Consumer {
    channel: Arc<Channel>,
    resample_touch: bool,
    batches: Vec<Batch>,
    touch_states: Vec<TouchState>,
    seq_chains: Vec<SeqChain>,
    consume_times: HashMap<u32, Nanos>,
    deferred: Option<BatchSample>,
}

impl Consumer {
    /// Create a consumer with resampling configured from the environment.
    #[must_use]
    pub fn new(channel: Arc<Channel>) -> Self {
        Self::with_resampling(channel, Self::touch_resampling_enabled())
    }

    /// Create a consumer with resampling explicitly on or off.
    #[must_use]
    pub fn with_resampling(channel: Arc<Channel>, resample_touch: bool) -> Self {
        Self {
            channel,
            resample_touch,
            batches: Vec::new(),
            touch_states: Vec::new(),
            seq_chains: Vec::new(),
            consume_times: HashMap::new(),
            deferred: None,
        }
    }

    /// The process-wide resampling default ([`RESAMPLING_ENV_VAR`]).
    #[must_use]
    pub fn touch_resampling_enabled() -> bool {
        !matches!(std::env::var(RESAMPLING_ENV_VAR).as_deref(), Ok("0"))
    }

    /// The channel this consumer reads from.
    #[must_use]
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Consume one event.
    ///
    /// Reads messages until one produces a deliverable event, returning the
    /// event together with the seq to pass to
    /// [`send_finished_signal`](Consumer::send_finished_signal) once the
    /// application has processed it. For a drained batch, that seq is the
    /// newest folded sample's; the others are chained to it.
    ///
    /// `frame_time` is the monotonic time of the frame being prepared;
    /// batched samples up to that time (less the resampling latency) are
    /// folded into the returned event. `None` delivers everything
    /// immediately without resampling. With `consume_batches == false`,
    /// batches are held until the caller asks for them: an empty socket
    /// returns `WouldBlock` even when samples are queued.
    pub fn consume(
        &mut self,
        factory: &mut dyn EventFactory,
        consume_batches: bool,
        frame_time: Option<Nanos>,
    ) -> Result<(u32, InputEvent)> {
        trace!(
            channel = %self.channel.name(),
            consume_batches,
            ?frame_time,
            "consume"
        );
        loop {
            let (seq, body) = match self.deferred.take() {
                Some(sample) => (sample.seq, Body::Motion(sample.motion)),
                None => match self.channel.receive() {
                    Ok(msg) => {
                        let previous = self.consume_times.insert(msg.seq, monotonic_now());
                        assert!(
                            previous.is_none(),
                            "already have a consume time for seq={}",
                            msg.seq
                        );
                        (msg.seq, msg.body)
                    }
                    Err(err) => {
                        // Flush a pending batch before surfacing the error,
                        // unless the caller asked to hold batches and the
                        // socket is merely empty. The receive error is the
                        // one the caller must see; a flush that fails
                        // (nothing ready, or an allocation refusal) never
                        // replaces it.
                        if consume_batches || err != TransportError::WouldBlock {
                            match self.consume_batch(factory, frame_time) {
                                Ok((seq, event)) => {
                                    trace!(
                                        channel = %self.channel.name(),
                                        seq,
                                        "consumed batched event"
                                    );
                                    return Ok((seq, event));
                                }
                                Err(_) => {}
                            }
                        }
                        return Err(err);
                    }
                },
            };

            match body {
                Body::Key(key) => {
                    let event = factory
                        .create_key_event(key)
                        .ok_or(TransportError::NoMemory)?;
                    trace!(channel = %self.channel.name(), seq, "consumed key event");
                    return Ok((seq, event));
                }
                Body::Motion(motion) => {
                    if let Some(delivered) = self.consume_motion(factory, seq, motion)? {
                        return Ok(delivered);
                    }
                }
                Body::Finished(_) | Body::Timeline(_) => {
                    panic!(
                        "channel '{}' consumer received a producer-direction message",
                        self.channel.name()
                    );
                }
                Body::Focus(focus) => {
                    let event = factory
                        .create_focus_event(focus)
                        .ok_or(TransportError::NoMemory)?;
                    return Ok((seq, event));
                }
                Body::Capture(capture) => {
                    let event = factory
                        .create_capture_event(capture)
                        .ok_or(TransportError::NoMemory)?;
                    return Ok((seq, event));
                }
                Body::Drag(drag) => {
                    let event = factory
                        .create_drag_event(drag)
                        .ok_or(TransportError::NoMemory)?;
                    return Ok((seq, event));
                }
                Body::TouchMode(touch_mode) => {
                    let event = factory
                        .create_touch_mode_event(touch_mode)
                        .ok_or(TransportError::NoMemory)?;
                    return Ok((seq, event));
                }
            }
        }
    }

    /// Handle one received motion message. Returns `None` when the message
    /// was absorbed into batching state and the receive loop should go
    /// around again.
    fn consume_motion(
        &mut self,
        factory: &mut dyn EventFactory,
        seq: u32,
        mut motion: MotionBody,
    ) -> Result<Option<(u32, InputEvent)>> {
        if let Some(batch_index) = self.find_batch(motion.device_id, motion.source) {
            if can_add_sample(&self.batches[batch_index], &motion) {
                self.batches[batch_index]
                    .samples
                    .push(BatchSample { seq, motion });
                trace!(channel = %self.channel.name(), seq, "appended to batch");
                return Ok(None);
            }
            if motion.source.is_pointer() && motion.masked_action() == MotionAction::Cancel {
                // The whole gesture is being cancelled; the application never
                // sees the queued samples, so ack them as unhandled and
                // swallow the cancel along with them.
                let batch = self.batches.remove(batch_index);
                for sample in &batch.samples {
                    if let Err(err) = self.send_finished_signal(sample.seq, false) {
                        warn!(
                            channel = %self.channel.name(),
                            seq = sample.seq,
                            %err,
                            "could not ack cancelled sample"
                        );
                    }
                }
                self.update_touch_state(&mut motion);
                self.consume_times.remove(&seq);
                trace!(channel = %self.channel.name(), seq, "dropped cancel for batched gesture");
                return Ok(None);
            }
            // Incompatible with the batch in progress: flush the batch now
            // and retry this message on the next call.
            let batch = self.batches.remove(batch_index);
            self.deferred = Some(BatchSample { seq, motion });
            let (out_seq, motion_event) = self.consume_samples(batch.samples);
            let event = factory
                .create_motion_event(motion_event)
                .ok_or(TransportError::NoMemory)?;
            trace!(
                channel = %self.channel.name(),
                seq = out_seq,
                "consumed batch event and deferred current event"
            );
            return Ok(Some((out_seq, event)));
        }

        let action = motion.masked_action();
        if action == MotionAction::Move || action == MotionAction::HoverMove {
            trace!(channel = %self.channel.name(), seq, "started batch");
            self.batches.push(Batch {
                samples: vec![BatchSample { seq, motion }],
            });
            return Ok(None);
        }

        self.update_touch_state(&mut motion);
        let event = factory
            .create_motion_event(motion.to_event())
            .ok_or(TransportError::NoMemory)?;
        trace!(channel = %self.channel.name(), seq, "consumed motion event");
        Ok(Some((seq, event)))
    }

    /// Drain the most recently started batch that has samples ready for
    /// `frame_time`.
    fn consume_batch(
        &mut self,
        factory: &mut dyn EventFactory,
        frame_time: Option<Nanos>,
    ) -> Result<(u32, InputEvent)> {
        for i in (0..self.batches.len()).rev() {
            let Some(frame_time) = frame_time else {
                let batch = self.batches.remove(i);
                let (seq, motion_event) = self.consume_samples(batch.samples);
                let event = factory
                    .create_motion_event(motion_event)
                    .ok_or(TransportError::NoMemory)?;
                return Ok((seq, event));
            };

            let mut sample_time = frame_time;
            if self.resample_touch {
                sample_time -= RESAMPLE_LATENCY;
            }
            let Some(split) = find_sample_no_later_than(&self.batches[i], sample_time) else {
                continue;
            };
            let samples: Vec<BatchSample> = self.batches[i].samples.drain(..=split).collect();
            let next = self.batches[i].samples.first().map(|s| s.motion.clone());
            if self.batches[i].samples.is_empty() {
                self.batches.remove(i);
            }
            let (seq, mut motion_event) = self.consume_samples(samples);
            if self.resample_touch {
                self.resample(sample_time, &mut motion_event, next.as_ref());
            }
            let event = factory
                .create_motion_event(motion_event)
                .ok_or(TransportError::NoMemory)?;
            return Ok((seq, event));
        }
        Err(TransportError::WouldBlock)
    }

    /// Fold `samples` into one motion event, registering one chain edge per
    /// coalesced sample. The returned seq is the newest sample's.
    fn consume_samples(&mut self, samples: Vec<BatchSample>) -> (u32, MotionEvent) {
        let mut chain: u32 = 0;
        let mut event: Option<MotionEvent> = None;
        for mut sample in samples {
            self.update_touch_state(&mut sample.motion);
            if let Some(event) = event.as_mut() {
                self.seq_chains.push(SeqChain {
                    seq: sample.seq,
                    chain,
                });
                event.meta_state |= sample.motion.meta_state;
                let coords: Vec<PointerCoords> =
                    sample.motion.pointers.iter().map(|p| p.coords).collect();
                event.add_sample(sample.motion.event_time, &coords);
            } else {
                event = Some(sample.motion.to_event());
            }
            chain = sample.seq;
        }
        match event {
            Some(event) => (chain, event),
            None => unreachable!("batches always hold at least one sample"),
        }
    }

    /// Fold a motion message into the per-device resampling state.
    fn update_touch_state(&mut self, msg: &mut MotionBody) {
        if !self.resample_touch || !msg.source.is_pointer() {
            return;
        }
        let device_id = msg.device_id;
        let source = msg.source;
        match msg.masked_action() {
            MotionAction::Down => {
                let index = match self.find_touch_state(device_id, source) {
                    Some(index) => index,
                    None => {
                        self.touch_states.push(TouchState::new(device_id, source));
                        self.touch_states.len() - 1
                    }
                };
                let state = &mut self.touch_states[index];
                state.initialize(device_id, source);
                state.add_history(msg);
            }
            MotionAction::Move => {
                if let Some(index) = self.find_touch_state(device_id, source) {
                    let state = &mut self.touch_states[index];
                    state.add_history(msg);
                    rewrite_message(state, msg);
                }
            }
            MotionAction::PointerDown => {
                if let Some(index) = self.find_touch_state(device_id, source) {
                    let state = &mut self.touch_states[index];
                    state
                        .last_resample
                        .ids
                        .clear_bit(msg.action_pointer_id() as u32);
                    rewrite_message(state, msg);
                }
            }
            MotionAction::PointerUp => {
                if let Some(index) = self.find_touch_state(device_id, source) {
                    let state = &mut self.touch_states[index];
                    rewrite_message(state, msg);
                    state
                        .last_resample
                        .ids
                        .clear_bit(msg.action_pointer_id() as u32);
                }
            }
            MotionAction::Scroll => {
                if let Some(index) = self.find_touch_state(device_id, source) {
                    rewrite_message(&mut self.touch_states[index], msg);
                }
            }
            MotionAction::Up | MotionAction::Cancel => {
                if let Some(index) = self.find_touch_state(device_id, source) {
                    rewrite_message(&mut self.touch_states[index], msg);
                    self.touch_states.remove(index);
                }
            }
            _ => {}
        }
    }

    /// Append a frame-aligned synthetic sample to a just-drained move event.
    fn resample(&mut self, sample_time: Nanos, event: &mut MotionEvent, next: Option<&MotionBody>) {
        if !event.source.is_pointer() || event.masked_action() != MotionAction::Move {
            return;
        }
        let Some(index) = self.find_touch_state(event.device_id, event.source) else {
            trace!("not resampled, no touch state for device");
            return;
        };
        resample_touch_state(&mut self.touch_states[index], sample_time, event, next);
    }

    /// Acknowledge a delivered event.
    ///
    /// Sends one finished message per seq coalesced into the event (oldest
    /// first) and finally one for `seq` itself, all carrying `handled` and
    /// the respective consume times. If a send fails partway, the
    /// unsent portion of the chain is restored so that retrying with the
    /// same `seq` resumes exactly where this attempt stopped.
    ///
    /// # Panics
    ///
    /// Panics when `seq` has no recorded consume time: the event was
    /// already acked, or never came from this consumer.
    pub fn send_finished_signal(&mut self, seq: u32, handled: bool) -> Result<()> {
        trace!(channel = %self.channel.name(), seq, handled, "send finished signal");
        if seq == 0 {
            warn!(
                channel = %self.channel.name(),
                "attempted to send a finished signal with sequence number 0"
            );
            return Err(TransportError::BadValue);
        }

        if !self.seq_chains.is_empty() {
            let mut current_seq = seq;
            let mut chain_seqs: Vec<u32> = Vec::new();
            let mut i = self.seq_chains.len();
            while i > 0 {
                i -= 1;
                if self.seq_chains[i].seq == current_seq {
                    current_seq = self.seq_chains[i].chain;
                    chain_seqs.push(current_seq);
                    self.seq_chains.remove(i);
                }
            }
            let mut status = Ok(());
            let mut chain_index = chain_seqs.len();
            while status.is_ok() && chain_index > 0 {
                chain_index -= 1;
                status = self.send_unchained_finished_signal(chain_seqs[chain_index], handled);
            }
            if let Err(err) = status {
                // At least one ack was not sent; put the unsent part of the
                // chain back so a retry repeats it.
                loop {
                    let edge_seq = if chain_index != 0 {
                        chain_seqs[chain_index - 1]
                    } else {
                        seq
                    };
                    self.seq_chains.push(SeqChain {
                        seq: edge_seq,
                        chain: chain_seqs[chain_index],
                    });
                    if chain_index == 0 {
                        break;
                    }
                    chain_index -= 1;
                }
                return Err(err);
            }
        }

        self.send_unchained_finished_signal(seq, handled)
    }

    fn send_unchained_finished_signal(&mut self, seq: u32, handled: bool) -> Result<()> {
        let consume_time = match self.consume_times.get(&seq) {
            Some(consume_time) => *consume_time,
            None => panic!("could not find consume time for seq={seq}"),
        };
        let msg = Message {
            seq,
            body: Body::Finished(FinishedBody {
                handled,
                consume_time,
            }),
        };
        self.channel.send(&msg)?;
        // Only forget the consume time once the ack is actually out; a
        // failed send retries and still needs it.
        self.consume_times.remove(&seq);
        Ok(())
    }

    /// Report frame production timestamps for an input event. Carries no
    /// seq and solicits no acknowledgement.
    pub fn send_timeline(&mut self, input_event_id: i32, timeline: GraphicsTimeline) -> Result<()> {
        trace!(
            channel = %self.channel.name(),
            input_event_id,
            gpu_completed_time = timeline.gpu_completed_time,
            present_time = timeline.present_time,
            "send timeline"
        );
        let msg = Message {
            seq: 0,
            body: Body::Timeline(TimelineBody {
                event_id: input_event_id,
                timeline,
            }),
        };
        if !msg.is_valid() {
            return Err(TransportError::BadValue);
        }
        self.channel.send(&msg)
    }

    /// Whether any batch is accumulating.
    #[must_use]
    pub fn has_pending_batch(&self) -> bool {
        !self.batches.is_empty()
    }

    /// Source of the oldest pending batch, if any.
    #[must_use]
    pub fn pending_batch_source(&self) -> Option<Source> {
        self.batches.first().map(|batch| batch.samples[0].motion.source)
    }

    /// Whether a call to [`consume`](Consumer::consume) could produce an
    /// event right now, from the socket or from a pending batch.
    #[must_use]
    pub fn probably_has_input(&self) -> bool {
        self.has_pending_batch() || self.channel.probably_has_input()
    }

    /// Human-readable state dump for debug tooling.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "resample_touch: {}", self.resample_touch);
        let _ = writeln!(out, "channel: {}", self.channel.name());
        match &self.deferred {
            Some(sample) => {
                let _ = writeln!(out, "deferred: seq={} {:?}", sample.seq, sample.motion.masked_action());
            }
            None => {
                let _ = writeln!(out, "deferred: none");
            }
        }
        let _ = writeln!(out, "batches:");
        for batch in &self.batches {
            let _ = writeln!(out, "  batch:");
            for sample in &batch.samples {
                let _ = write!(
                    out,
                    "    seq={} action={:?} t={}",
                    sample.seq,
                    sample.motion.masked_action(),
                    sample.motion.event_time
                );
                for pointer in &sample.motion.pointers {
                    let _ = write!(
                        out,
                        " [{}]=({:.1}, {:.1})",
                        pointer.properties.id,
                        pointer.coords.x(),
                        pointer.coords.y()
                    );
                }
                let _ = writeln!(out);
            }
        }
        let _ = writeln!(out, "seq_chains:");
        for chain in &self.seq_chains {
            let _ = writeln!(out, "  seq={} chain={}", chain.seq, chain.chain);
        }
        let _ = writeln!(out, "consume_times: {} entries", self.consume_times.len());
        out
    }

    fn find_batch(&self, device_id: i32, source: Source) -> Option<usize> {
        self.batches.iter().position(|batch| {
            let head = &batch.samples[0].motion;
            head.device_id == device_id && head.source == source
        })
    }

    fn find_touch_state(&self, device_id: i32, source: Source) -> Option<usize> {
        self.touch_states
            .iter()
            .position(|state| state.device_id == device_id && state.source == source)
    }
}

/// A sample extends a batch only when it would coalesce losslessly: same
/// pointer layout and same action word as the batch head.
fn can_add_sample(batch: &Batch, msg: &MotionBody) -> bool {
    let head = &batch.samples[0].motion;
    if head.pointer_count() != msg.pointer_count() || head.action != msg.action {
        return false;
    }
    head.pointers
        .iter()
        .zip(&msg.pointers)
        .all(|(a, b)| a.properties == b.properties)
}

/// Index of the newest sample at or before `time`, if any.
fn find_sample_no_later_than(batch: &Batch, time: Nanos) -> Option<usize> {
    let mut index = 0;
    while index < batch.samples.len() && batch.samples[index].motion.event_time <= time {
        index += 1;
    }
    index.checked_sub(1)
}

fn monotonic_now() -> Nanos {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => ts.tv_sec() * 1_000_000_000 + ts.tv_nsec(),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use evlink_core::event::{
        CaptureEvent, DragEvent, FocusEvent, KeyAction, KeyEvent, TouchModeEvent,
    };
    use evlink_core::factory::DefaultEventFactory;
    use evlink_core::motion::{Pointer, PointerProperties, ToolType};

    /// Factory that refuses every construction, counting the refusals so
    /// tests can prove the allocation path was actually reached.
    #[derive(Default)]
    struct RefusingFactory {
        refusals: usize,
    }

    impl EventFactory for RefusingFactory {
        fn create_key_event(&mut self, _: KeyEvent) -> Option<InputEvent> {
            self.refusals += 1;
            None
        }
        fn create_motion_event(&mut self, _: MotionEvent) -> Option<InputEvent> {
            self.refusals += 1;
            None
        }
        fn create_focus_event(&mut self, _: FocusEvent) -> Option<InputEvent> {
            self.refusals += 1;
            None
        }
        fn create_capture_event(&mut self, _: CaptureEvent) -> Option<InputEvent> {
            self.refusals += 1;
            None
        }
        fn create_drag_event(&mut self, _: DragEvent) -> Option<InputEvent> {
            self.refusals += 1;
            None
        }
        fn create_touch_mode_event(&mut self, _: TouchModeEvent) -> Option<InputEvent> {
            self.refusals += 1;
            None
        }
    }

    const MS: Nanos = 1_000_000;

    fn motion_message(seq: u32, action: u32, event_time: Nanos, x: f32) -> Message {
        Message {
            seq,
            body: Body::Motion(MotionBody {
                event_id: seq as i32,
                event_time,
                device_id: 1,
                source: Source::TOUCHSCREEN,
                display_id: 0,
                hmac: [0; 32],
                action,
                action_button: 0,
                flags: 0,
                meta_state: 0,
                button_state: 0,
                classification: Default::default(),
                edge_flags: 0,
                down_time: 0,
                transform: Default::default(),
                x_precision: 0.0,
                y_precision: 0.0,
                x_cursor_position: 0.0,
                y_cursor_position: 0.0,
                raw_transform: Default::default(),
                pointers: vec![Pointer {
                    properties: PointerProperties {
                        id: 0,
                        tool_type: ToolType::Finger,
                    },
                    coords: PointerCoords::from_xy(x, 0.0),
                }],
            }),
        }
    }

    fn pair() -> (Arc<Channel>, Consumer) {
        let (server, client) = Channel::pair("consumer test").expect("pair");
        let consumer = Consumer::with_resampling(Arc::new(client), true);
        (Arc::new(server), consumer)
    }

    #[test]
    fn moves_batch_until_flushed() {
        let (server, mut consumer) = pair();
        let mut factory = DefaultEventFactory;
        let action = MotionAction::Move.to_raw();
        for (seq, t) in [(10u32, 0), (11, 5 * MS), (12, 10 * MS)] {
            server.send(&motion_message(seq, action, t, t as f32)).expect("send");
        }

        // Batches are held while the caller does not ask for them.
        assert_eq!(
            consumer.consume(&mut factory, false, None),
            Err(TransportError::WouldBlock)
        );
        assert!(consumer.has_pending_batch());
        assert_eq!(consumer.pending_batch_source(), Some(Source::TOUCHSCREEN));

        let (seq, event) = consumer
            .consume(&mut factory, true, None)
            .expect("flushed batch");
        assert_eq!(seq, 12);
        let InputEvent::Motion(motion) = event else {
            panic!("expected motion event");
        };
        assert_eq!(motion.sample_count(), 3);
        assert_eq!(motion.sample_event_time(0), 0);
        assert_eq!(motion.event_time(), 10 * MS);
        assert!(!consumer.has_pending_batch());
    }

    #[test]
    fn batch_ack_covers_all_samples() {
        let (server, mut consumer) = pair();
        let mut factory = DefaultEventFactory;
        let action = MotionAction::Move.to_raw();
        for (seq, t) in [(10u32, 0), (11, 5 * MS), (12, 10 * MS)] {
            server.send(&motion_message(seq, action, t, t as f32)).expect("send");
        }
        let (seq, _event) = consumer.consume(&mut factory, true, None).expect("event");
        consumer.send_finished_signal(seq, true).expect("finish");

        let mut acked = Vec::new();
        loop {
            match server.receive() {
                Ok(msg) => {
                    assert_eq!(msg.message_type(), MessageType::Finished);
                    let Body::Finished(finished) = msg.body else {
                        unreachable!()
                    };
                    assert!(finished.handled);
                    acked.push(msg.seq);
                }
                Err(TransportError::WouldBlock) => break,
                Err(err) => panic!("unexpected receive error: {err}"),
            }
        }
        // Chained acks oldest first, the explicitly finished seq last.
        assert_eq!(acked, vec![10, 11, 12]);
    }

    #[test]
    fn finish_with_zero_seq_is_rejected() {
        let (_server, mut consumer) = pair();
        assert_eq!(
            consumer.send_finished_signal(0, true),
            Err(TransportError::BadValue)
        );
    }

    #[test]
    #[should_panic(expected = "could not find consume time")]
    fn finish_of_unknown_seq_panics() {
        let (_server, mut consumer) = pair();
        let _ = consumer.send_finished_signal(42, true);
    }

    #[test]
    #[should_panic(expected = "already have a consume time")]
    fn duplicate_seq_from_producer_panics() {
        let (server, mut consumer) = pair();
        let mut factory = DefaultEventFactory;
        let action = MotionAction::Down.to_raw();
        server.send(&motion_message(5, action, 0, 0.0)).expect("send");
        server.send(&motion_message(5, action, 1, 0.0)).expect("send");
        let _ = consumer.consume(&mut factory, false, None);
        let _ = consumer.consume(&mut factory, false, None);
    }

    #[test]
    #[should_panic(expected = "producer-direction message")]
    fn finished_message_to_consumer_panics() {
        let (server, mut consumer) = pair();
        let mut factory = DefaultEventFactory;
        server
            .send(&Message {
                seq: 1,
                body: Body::Finished(FinishedBody {
                    handled: true,
                    consume_time: 1,
                }),
            })
            .expect("send");
        let _ = consumer.consume(&mut factory, false, None);
    }

    #[test]
    fn down_is_delivered_immediately() {
        let (server, mut consumer) = pair();
        let mut factory = DefaultEventFactory;
        server
            .send(&motion_message(7, MotionAction::Down.to_raw(), 0, 1.0))
            .expect("send");
        let (seq, event) = consumer.consume(&mut factory, false, None).expect("event");
        assert_eq!(seq, 7);
        assert!(matches!(event, InputEvent::Motion(_)));
    }

    #[test]
    fn timeline_validation() {
        let (_server, mut consumer) = pair();
        let bad = GraphicsTimeline {
            gpu_completed_time: 10,
            present_time: 10,
        };
        assert_eq!(
            consumer.send_timeline(1, bad),
            Err(TransportError::BadValue)
        );
    }

    #[test]
    fn dump_describes_state() {
        let (server, mut consumer) = pair();
        let mut factory = DefaultEventFactory;
        server
            .send(&motion_message(3, MotionAction::Move.to_raw(), 2 * MS, 4.0))
            .expect("send");
        let _ = consumer.consume(&mut factory, false, None);
        let dump = consumer.dump();
        assert!(dump.contains("consumer test (client)"));
        assert!(dump.contains("seq=3"));
        assert!(dump.contains("Move"));
    }

    #[test]
    fn frame_time_splits_batch() {
        let (server, mut consumer) = pair();
        let mut factory = DefaultEventFactory;
        server
            .send(&motion_message(9, MotionAction::Down.to_raw(), 0, 0.0))
            .expect("send");
        let _ = consumer.consume(&mut factory, false, None).expect("down");

        let action = MotionAction::Move.to_raw();
        for (seq, t) in [(1u32, 2 * MS), (2, 5 * MS), (3, 20 * MS)] {
            server.send(&motion_message(seq, action, t, t as f32)).expect("send");
        }
        // frame_time 13ms => sample_time 8ms with resampling on: samples at
        // 2 and 5ms are folded, the one at 20ms stays queued.
        let (seq, event) = consumer
            .consume(&mut factory, true, Some(13 * MS))
            .expect("event");
        assert_eq!(seq, 2);
        let InputEvent::Motion(motion) = event else {
            panic!("expected motion event");
        };
        assert!(consumer.has_pending_batch());
        // Two real samples plus the interpolated one at 8ms.
        assert_eq!(motion.sample_count(), 3);
        assert_eq!(motion.event_time(), 8 * MS);
    }

    #[test]
    fn no_ready_samples_is_would_block() {
        let (server, mut consumer) = pair();
        let mut factory = DefaultEventFactory;
        server
            .send(&motion_message(1, MotionAction::Move.to_raw(), 50 * MS, 1.0))
            .expect("send");
        assert_eq!(
            consumer.consume(&mut factory, true, Some(10 * MS)),
            Err(TransportError::WouldBlock)
        );
        assert!(consumer.has_pending_batch());
    }

    #[test]
    fn refusing_factory_yields_no_memory_for_direct_motion() {
        let (server, mut consumer) = pair();
        server
            .send(&motion_message(7, MotionAction::Down.to_raw(), 0, 1.0))
            .expect("send");
        let mut factory = RefusingFactory::default();
        assert_eq!(
            consumer.consume(&mut factory, false, None),
            Err(TransportError::NoMemory)
        );
        assert_eq!(factory.refusals, 1);
    }

    #[test]
    fn refusing_factory_yields_no_memory_for_key_events() {
        let (server, mut consumer) = pair();
        server
            .send(&Message {
                seq: 4,
                body: Body::Key(KeyEvent::new(KeyAction::Down, 30)),
            })
            .expect("send");
        let mut factory = RefusingFactory::default();
        assert_eq!(
            consumer.consume(&mut factory, false, None),
            Err(TransportError::NoMemory)
        );
        assert_eq!(factory.refusals, 1);
    }

    #[test]
    fn refusing_factory_yields_no_memory_for_incompatible_action_flush() {
        let (server, mut consumer) = pair();
        let action = MotionAction::Move.to_raw();
        server.send(&motion_message(1, action, 1 * MS, 1.0)).expect("send");
        server.send(&motion_message(2, action, 2 * MS, 2.0)).expect("send");
        // The action change forces the batch to flush through the factory.
        server
            .send(&motion_message(3, MotionAction::Up.to_raw(), 3 * MS, 2.0))
            .expect("send");
        let mut factory = RefusingFactory::default();
        assert_eq!(
            consumer.consume(&mut factory, false, None),
            Err(TransportError::NoMemory)
        );
        assert_eq!(factory.refusals, 1);
    }

    #[test]
    fn receive_error_is_not_masked_by_a_failing_batch_flush() {
        let (server, mut consumer) = pair();
        let mut factory = DefaultEventFactory;
        let action = MotionAction::Move.to_raw();
        server.send(&motion_message(1, action, 1 * MS, 1.0)).expect("send");
        server.send(&motion_message(2, action, 2 * MS, 2.0)).expect("send");
        assert_eq!(
            consumer.consume(&mut factory, false, None),
            Err(TransportError::WouldBlock)
        );
        assert!(consumer.has_pending_batch());

        // The peer dies; the flush attempted on the way out cannot allocate.
        // The caller must still see the dead peer, not the refusal.
        drop(server);
        let mut refusing = RefusingFactory::default();
        assert_eq!(
            consumer.consume(&mut refusing, true, None),
            Err(TransportError::DeadObject)
        );
        assert_eq!(refusing.refusals, 1);
    }

    #[test]
    fn empty_socket_stays_would_block_when_batch_flush_cannot_allocate() {
        let (server, mut consumer) = pair();
        let mut factory = DefaultEventFactory;
        let action = MotionAction::Move.to_raw();
        server.send(&motion_message(1, action, 1 * MS, 1.0)).expect("send");
        server.send(&motion_message(2, action, 2 * MS, 2.0)).expect("send");
        assert_eq!(
            consumer.consume(&mut factory, false, None),
            Err(TransportError::WouldBlock)
        );

        let mut refusing = RefusingFactory::default();
        assert_eq!(
            consumer.consume(&mut refusing, true, None),
            Err(TransportError::WouldBlock)
        );
        assert_eq!(refusing.refusals, 1);
    }
}
