#![forbid(unsafe_code)]

//! Wire message format.
//!
//! Every datagram on a channel is exactly one [`Message`]: an 8-byte header
//! (`type: u32`, `seq: u32`) followed by a body whose layout is selected by
//! the type tag. The encoding is packed little-endian, written field by
//! field. There is no length prefix and no versioning; the socket preserves
//! datagram boundaries and both endpoints are built from the same layout.
//!
//! # Sanitization
//!
//! [`Message::encode`] zero-fills the output buffer before writing, then
//! writes only the fields of the active variant; for motion pointers, only
//! the populated axis-value slots. Encoding is therefore the sanitized copy:
//! no stale buffer content can leak across the process boundary, and all
//! bytes outside the active variant are zero on the wire.
//!
//! # Validation
//!
//! [`Message::decode`] rejects any datagram whose length differs from the
//! size implied by its type tag (and pointer count), any unknown type tag,
//! and any variant-specific invariant violation. All of these surface as
//! [`TransportError::BadValue`] and the datagram is dropped.

use evlink_core::event::{CaptureEvent, DragEvent, FocusEvent, KeyAction, KeyEvent, Nanos, Source, TouchModeEvent};
use evlink_core::motion::{
    MotionClassification, MotionEvent, Pointer, PointerCoords, PointerProperties, ToolType,
    Transform, ACTION_POINTER_INDEX_MASK, ACTION_POINTER_INDEX_SHIFT, MAX_AXES, MAX_POINTERS,
    MotionAction,
};
use tracing::error;

use crate::error::{Result, TransportError};

/// Size of the fixed message header.
pub const HEADER_SIZE: usize = 8;

const KEY_BODY_SIZE: usize = 88;
const MOTION_BODY_BASE_SIZE: usize = 160;
/// Fixed on-wire footprint of one motion pointer: properties (8), axis
/// bitmap (8), axis value slots, resampled flag (4).
const POINTER_BLOCK_SIZE: usize = 16 + MAX_AXES * 4 + 4;
const FINISHED_BODY_SIZE: usize = 12;
const FOCUS_BODY_SIZE: usize = 8;
const CAPTURE_BODY_SIZE: usize = 8;
const DRAG_BODY_SIZE: usize = 16;
const TIMELINE_BODY_SIZE: usize = 20;
const TOUCH_MODE_BODY_SIZE: usize = 8;

/// Size of the largest possible message (a motion with [`MAX_POINTERS`]
/// pointers). Receive buffers are sized to this.
pub const MAX_MESSAGE_SIZE: usize =
    HEADER_SIZE + MOTION_BODY_BASE_SIZE + MAX_POINTERS * POINTER_BLOCK_SIZE;

/// Wire type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Key,
    Motion,
    Finished,
    Focus,
    Capture,
    Drag,
    Timeline,
    TouchMode,
}

impl MessageType {
    /// Decode a type tag; `None` for unknown values.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(MessageType::Key),
            1 => Some(MessageType::Motion),
            2 => Some(MessageType::Finished),
            3 => Some(MessageType::Focus),
            4 => Some(MessageType::Capture),
            5 => Some(MessageType::Drag),
            6 => Some(MessageType::Timeline),
            7 => Some(MessageType::TouchMode),
            _ => None,
        }
    }

    /// The wire value of this tag.
    #[must_use]
    pub const fn to_raw(self) -> u32 {
        match self {
            MessageType::Key => 0,
            MessageType::Motion => 1,
            MessageType::Finished => 2,
            MessageType::Focus => 3,
            MessageType::Capture => 4,
            MessageType::Drag => 5,
            MessageType::Timeline => 6,
            MessageType::TouchMode => 7,
        }
    }
}

/// Body of a motion message: one sample of one or more pointers.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionBody {
    pub event_id: i32,
    pub event_time: Nanos,
    pub device_id: i32,
    pub source: Source,
    pub display_id: i32,
    pub hmac: [u8; 32],
    /// Raw action word (masked transition plus pointer index).
    pub action: u32,
    pub action_button: i32,
    pub flags: u32,
    pub meta_state: u32,
    pub button_state: u32,
    pub classification: MotionClassification,
    pub edge_flags: i32,
    pub down_time: Nanos,
    pub transform: Transform,
    pub x_precision: f32,
    pub y_precision: f32,
    pub x_cursor_position: f32,
    pub y_cursor_position: f32,
    pub raw_transform: Transform,
    /// One entry per pointer; length is the wire pointer count.
    pub pointers: Vec<Pointer>,
}

impl MotionBody {
    /// Number of pointers in this sample.
    #[must_use]
    pub fn pointer_count(&self) -> usize {
        self.pointers.len()
    }

    /// The masked gesture transition.
    #[must_use]
    pub fn masked_action(&self) -> MotionAction {
        MotionAction::from_raw(self.action)
    }

    /// Id of the pointer a pointer-indexed action refers to.
    #[must_use]
    pub fn action_pointer_id(&self) -> i32 {
        let index =
            ((self.action & ACTION_POINTER_INDEX_MASK) >> ACTION_POINTER_INDEX_SHIFT) as usize;
        self.pointers[index].properties.id
    }

    /// Materialize a single-sample [`MotionEvent`] from this body.
    #[must_use]
    pub fn to_event(&self) -> MotionEvent {
        let properties: Vec<PointerProperties> =
            self.pointers.iter().map(|p| p.properties).collect();
        let coords: Vec<PointerCoords> = self.pointers.iter().map(|p| p.coords).collect();
        let mut event = MotionEvent::new(properties, self.event_time, &coords);
        event.event_id = self.event_id;
        event.device_id = self.device_id;
        event.source = self.source;
        event.display_id = self.display_id;
        event.hmac = self.hmac;
        event.action = self.action;
        event.action_button = self.action_button;
        event.flags = self.flags;
        event.edge_flags = self.edge_flags;
        event.meta_state = self.meta_state;
        event.button_state = self.button_state;
        event.classification = self.classification;
        event.transform = self.transform;
        event.x_precision = self.x_precision;
        event.y_precision = self.y_precision;
        event.x_cursor_position = self.x_cursor_position;
        event.y_cursor_position = self.y_cursor_position;
        event.raw_transform = self.raw_transform;
        event.down_time = self.down_time;
        event
    }

    /// Capture the newest sample of `event` as a wire body.
    #[must_use]
    pub fn from_event(event: &MotionEvent) -> Self {
        let pointers = (0..event.pointer_count())
            .map(|i| Pointer {
                properties: event.pointer_properties()[i],
                coords: *event.coords(i),
            })
            .collect();
        Self {
            event_id: event.event_id,
            event_time: event.event_time(),
            device_id: event.device_id,
            source: event.source,
            display_id: event.display_id,
            hmac: event.hmac,
            action: event.action,
            action_button: event.action_button,
            flags: event.flags,
            meta_state: event.meta_state,
            button_state: event.button_state,
            classification: event.classification,
            edge_flags: event.edge_flags,
            down_time: event.down_time,
            transform: event.transform,
            x_precision: event.x_precision,
            y_precision: event.y_precision,
            x_cursor_position: event.x_cursor_position,
            y_cursor_position: event.y_cursor_position,
            raw_transform: event.raw_transform,
            pointers,
        }
    }
}

/// Body of a finished (acknowledgement) message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishedBody {
    /// Whether the application handled the event.
    pub handled: bool,
    /// When the consumer first read the event off the socket.
    pub consume_time: Nanos,
}

/// Frame production timestamps reported back to the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsTimeline {
    /// When GPU work for the frame containing the event completed.
    pub gpu_completed_time: Nanos,
    /// When the frame was presented. Must be after `gpu_completed_time`.
    pub present_time: Nanos,
}

/// Body of a timeline message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineBody {
    /// The input event these timestamps belong to.
    pub event_id: i32,
    pub timeline: GraphicsTimeline,
}

/// The tagged message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Key(KeyEvent),
    Motion(MotionBody),
    Finished(FinishedBody),
    Focus(FocusEvent),
    Capture(CaptureEvent),
    Drag(DragEvent),
    Timeline(TimelineBody),
    TouchMode(TouchModeEvent),
}

impl Body {
    /// The wire type tag for this body.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Body::Key(_) => MessageType::Key,
            Body::Motion(_) => MessageType::Motion,
            Body::Finished(_) => MessageType::Finished,
            Body::Focus(_) => MessageType::Focus,
            Body::Capture(_) => MessageType::Capture,
            Body::Drag(_) => MessageType::Drag,
            Body::Timeline(_) => MessageType::Timeline,
            Body::TouchMode(_) => MessageType::TouchMode,
        }
    }
}

/// One wire message: sequence number plus tagged body.
///
/// `seq` is chosen by the producer and must be non-zero for every message
/// that solicits an acknowledgement; timeline messages carry `seq == 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub seq: u32,
    pub body: Body,
}

impl Message {
    /// The wire type tag.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    /// Exact on-wire size of this message in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        match &self.body {
            Body::Motion(motion) => {
                HEADER_SIZE + MOTION_BODY_BASE_SIZE + motion.pointer_count() * POINTER_BLOCK_SIZE
            }
            other => HEADER_SIZE + fixed_body_size(other.message_type()),
        }
    }

    /// Variant-specific validity: motion pointer counts must be in
    /// `1..=MAX_POINTERS`, timeline present time must be after GPU
    /// completion.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match &self.body {
            Body::Motion(motion) => {
                let count = motion.pointer_count();
                if count < 1 || count > MAX_POINTERS {
                    error!(pointer_count = count, "invalid MOTION message");
                    return false;
                }
                true
            }
            Body::Timeline(timeline) => {
                let valid =
                    timeline.timeline.present_time > timeline.timeline.gpu_completed_time;
                if !valid {
                    error!(
                        gpu_completed_time = timeline.timeline.gpu_completed_time,
                        present_time = timeline.timeline.present_time,
                        "invalid TIMELINE message"
                    );
                }
                valid
            }
            _ => true,
        }
    }

    /// Serialize into `out`, returning the number of bytes to send.
    ///
    /// The buffer is zeroed first; only live fields of the active variant
    /// (and only populated axis slots of each pointer) are written.
    pub fn encode(&self, out: &mut [u8; MAX_MESSAGE_SIZE]) -> usize {
        out.fill(0);
        let mut w = Writer::new(out);
        w.put_u32(self.message_type().to_raw());
        w.put_u32(self.seq);
        match &self.body {
            Body::Key(key) => encode_key(&mut w, key),
            Body::Motion(motion) => encode_motion(&mut w, motion),
            Body::Finished(finished) => {
                w.put_bool(finished.handled);
                w.put_i64(finished.consume_time);
            }
            Body::Focus(focus) => {
                w.put_i32(focus.event_id);
                w.put_bool(focus.has_focus);
            }
            Body::Capture(capture) => {
                w.put_i32(capture.event_id);
                w.put_bool(capture.pointer_capture_enabled);
            }
            Body::Drag(drag) => {
                w.put_i32(drag.event_id);
                w.put_f32(drag.x);
                w.put_f32(drag.y);
                w.put_bool(drag.is_exiting);
            }
            Body::Timeline(timeline) => {
                w.put_i32(timeline.event_id);
                w.put_i64(timeline.timeline.gpu_completed_time);
                w.put_i64(timeline.timeline.present_time);
            }
            Body::TouchMode(touch_mode) => {
                w.put_i32(touch_mode.event_id);
                w.put_bool(touch_mode.is_in_touch_mode);
            }
        }
        let size = self.size();
        debug_assert_eq!(w.position(), size, "encoder wrote a different size than size()");
        size
    }

    /// Deserialize one datagram.
    ///
    /// Returns [`TransportError::BadValue`] for unknown type tags, length
    /// mismatches, and variant invariant violations.
    pub fn decode(buf: &[u8]) -> Result<Message> {
        if buf.len() < HEADER_SIZE {
            error!(len = buf.len(), "received runt message");
            return Err(TransportError::BadValue);
        }
        let raw_type = read_u32(buf, 0);
        let seq = read_u32(buf, 4);
        let Some(message_type) = MessageType::from_raw(raw_type) else {
            error!(raw_type, "received message with invalid type");
            return Err(TransportError::BadValue);
        };

        let expected = match message_type {
            MessageType::Motion => {
                if buf.len() < HEADER_SIZE + 8 {
                    error!(len = buf.len(), "received truncated MOTION message");
                    return Err(TransportError::BadValue);
                }
                let pointer_count = read_u32(buf, HEADER_SIZE + 4) as usize;
                if pointer_count < 1 || pointer_count > MAX_POINTERS {
                    error!(pointer_count, "received MOTION with invalid pointer count");
                    return Err(TransportError::BadValue);
                }
                HEADER_SIZE + MOTION_BODY_BASE_SIZE + pointer_count * POINTER_BLOCK_SIZE
            }
            other => HEADER_SIZE + fixed_body_size(other),
        };
        if buf.len() != expected {
            error!(
                len = buf.len(),
                expected, "received message of incorrect size"
            );
            return Err(TransportError::BadValue);
        }

        let mut r = Reader::new(buf, HEADER_SIZE);
        let body = match message_type {
            MessageType::Key => Body::Key(decode_key(&mut r)),
            MessageType::Motion => Body::Motion(decode_motion(&mut r)),
            MessageType::Finished => Body::Finished(FinishedBody {
                handled: r.get_bool(),
                consume_time: r.get_i64(),
            }),
            MessageType::Focus => Body::Focus(FocusEvent {
                event_id: r.get_i32(),
                has_focus: r.get_bool(),
            }),
            MessageType::Capture => Body::Capture(CaptureEvent {
                event_id: r.get_i32(),
                pointer_capture_enabled: r.get_bool(),
            }),
            MessageType::Drag => Body::Drag(DragEvent {
                event_id: r.get_i32(),
                x: r.get_f32(),
                y: r.get_f32(),
                is_exiting: r.get_bool(),
            }),
            MessageType::Timeline => Body::Timeline(TimelineBody {
                event_id: r.get_i32(),
                timeline: GraphicsTimeline {
                    gpu_completed_time: r.get_i64(),
                    present_time: r.get_i64(),
                },
            }),
            MessageType::TouchMode => Body::TouchMode(TouchModeEvent {
                event_id: r.get_i32(),
                is_in_touch_mode: r.get_bool(),
            }),
        };

        let message = Message { seq, body };
        if !message.is_valid() {
            return Err(TransportError::BadValue);
        }
        Ok(message)
    }
}

const fn fixed_body_size(message_type: MessageType) -> usize {
    match message_type {
        MessageType::Key => KEY_BODY_SIZE,
        // Caller computes motion sizes from the pointer count.
        MessageType::Motion => MOTION_BODY_BASE_SIZE,
        MessageType::Finished => FINISHED_BODY_SIZE,
        MessageType::Focus => FOCUS_BODY_SIZE,
        MessageType::Capture => CAPTURE_BODY_SIZE,
        MessageType::Drag => DRAG_BODY_SIZE,
        MessageType::Timeline => TIMELINE_BODY_SIZE,
        MessageType::TouchMode => TOUCH_MODE_BODY_SIZE,
    }
}

fn encode_key(w: &mut Writer<'_>, key: &KeyEvent) {
    w.put_i32(key.event_id);
    w.put_i64(key.event_time);
    w.put_i32(key.device_id);
    w.put_u32(key.source.bits());
    w.put_i32(key.display_id);
    w.put_bytes(&key.hmac);
    w.put_u32(key.action.to_raw());
    w.put_u32(key.flags);
    w.put_i32(key.key_code);
    w.put_i32(key.scan_code);
    w.put_u32(key.meta_state);
    w.put_i32(key.repeat_count);
    w.put_i64(key.down_time);
}

fn decode_key(r: &mut Reader<'_>) -> KeyEvent {
    let event_id = r.get_i32();
    let event_time = r.get_i64();
    let device_id = r.get_i32();
    let source = Source::from_bits_retain(r.get_u32());
    let display_id = r.get_i32();
    let mut hmac = [0u8; 32];
    r.get_bytes(&mut hmac);
    KeyEvent {
        event_id,
        event_time,
        device_id,
        source,
        display_id,
        hmac,
        action: KeyAction::from_raw(r.get_u32()),
        flags: r.get_u32(),
        key_code: r.get_i32(),
        scan_code: r.get_i32(),
        meta_state: r.get_u32(),
        repeat_count: r.get_i32(),
        down_time: r.get_i64(),
    }
}

fn encode_motion(w: &mut Writer<'_>, motion: &MotionBody) {
    w.put_i32(motion.event_id);
    w.put_u32(motion.pointer_count() as u32);
    w.put_i64(motion.event_time);
    w.put_i32(motion.device_id);
    w.put_u32(motion.source.bits());
    w.put_i32(motion.display_id);
    w.put_bytes(&motion.hmac);
    w.put_u32(motion.action);
    w.put_i32(motion.action_button);
    w.put_u32(motion.flags);
    w.put_u32(motion.meta_state);
    w.put_u32(motion.button_state);
    w.put_u32(motion.classification.to_raw());
    w.put_i32(motion.edge_flags);
    w.put_i64(motion.down_time);
    for v in motion.transform.to_array() {
        w.put_f32(v);
    }
    w.put_f32(motion.x_precision);
    w.put_f32(motion.y_precision);
    w.put_f32(motion.x_cursor_position);
    w.put_f32(motion.y_cursor_position);
    for v in motion.raw_transform.to_array() {
        w.put_f32(v);
    }
    for pointer in &motion.pointers {
        w.put_i32(pointer.properties.id);
        w.put_u32(pointer.properties.tool_type.to_raw());
        w.put_u64(pointer.coords.bits());
        let packed = pointer.coords.packed_values();
        for v in packed {
            w.put_f32(*v);
        }
        // Unused axis slots stay zero.
        w.skip((MAX_AXES - packed.len()) * 4);
        w.put_bool(pointer.coords.is_resampled);
    }
}

fn decode_motion(r: &mut Reader<'_>) -> MotionBody {
    let event_id = r.get_i32();
    let pointer_count = r.get_u32() as usize;
    let event_time = r.get_i64();
    let device_id = r.get_i32();
    let source = Source::from_bits_retain(r.get_u32());
    let display_id = r.get_i32();
    let mut hmac = [0u8; 32];
    r.get_bytes(&mut hmac);
    let action = r.get_u32();
    let action_button = r.get_i32();
    let flags = r.get_u32();
    let meta_state = r.get_u32();
    let button_state = r.get_u32();
    let classification = MotionClassification::from_raw(r.get_u32());
    let edge_flags = r.get_i32();
    let down_time = r.get_i64();
    let mut transform = [0.0f32; 6];
    for v in &mut transform {
        *v = r.get_f32();
    }
    let x_precision = r.get_f32();
    let y_precision = r.get_f32();
    let x_cursor_position = r.get_f32();
    let y_cursor_position = r.get_f32();
    let mut raw_transform = [0.0f32; 6];
    for v in &mut raw_transform {
        *v = r.get_f32();
    }
    let mut pointers = Vec::with_capacity(pointer_count);
    for _ in 0..pointer_count {
        let id = r.get_i32();
        let tool_type = ToolType::from_raw(r.get_u32());
        let bits = r.get_u64();
        let count = (bits.count_ones() as usize).min(MAX_AXES);
        let mut packed = [0.0f32; MAX_AXES];
        for v in packed.iter_mut().take(count) {
            *v = r.get_f32();
        }
        r.skip((MAX_AXES - count) * 4);
        let is_resampled = r.get_bool();
        pointers.push(Pointer {
            properties: PointerProperties { id, tool_type },
            coords: PointerCoords::from_packed(bits, &packed[..count], is_resampled),
        });
    }
    MotionBody {
        event_id,
        event_time,
        device_id,
        source,
        display_id,
        hmac,
        action,
        action_button,
        flags,
        meta_state,
        button_state,
        classification,
        edge_flags,
        down_time,
        transform: Transform::from_array(transform),
        x_precision,
        y_precision,
        x_cursor_position,
        y_cursor_position,
        raw_transform: Transform::from_array(raw_transform),
        pointers,
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn put_u32(&mut self, v: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }

    fn put_i32(&mut self, v: i32) {
        self.put_u32(v as u32);
    }

    fn put_u64(&mut self, v: u64) {
        self.buf[self.pos..self.pos + 8].copy_from_slice(&v.to_le_bytes());
        self.pos += 8;
    }

    fn put_i64(&mut self, v: i64) {
        self.put_u64(v as u64);
    }

    fn put_f32(&mut self, v: f32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }

    fn put_bool(&mut self, v: bool) {
        self.put_u32(u32::from(v));
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn skip(&mut self, n: usize) {
        self.pos += n;
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn get_u32(&mut self) -> u32 {
        let v = read_u32(self.buf, self.pos);
        self.pos += 4;
        v
    }

    fn get_i32(&mut self) -> i32 {
        self.get_u32() as i32
    }

    fn get_u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        u64::from_le_bytes(bytes)
    }

    fn get_i64(&mut self) -> i64 {
        self.get_u64() as i64
    }

    fn get_f32(&mut self) -> f32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        f32::from_le_bytes(bytes)
    }

    fn get_bool(&mut self) -> bool {
        self.get_u32() != 0
    }

    fn get_bytes(&mut self, out: &mut [u8]) {
        out.copy_from_slice(&self.buf[self.pos..self.pos + out.len()]);
        self.pos += out.len();
    }

    fn skip(&mut self, n: usize) {
        self.pos += n;
    }
}
