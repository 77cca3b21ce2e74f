#![forbid(unsafe_code)]

//! Canonical input/event types.
//!
//! This module defines the non-motion event values carried by the transport,
//! plus the identifiers shared by all events (sources, timestamps). All
//! events derive `Clone` and `PartialEq` for use in tests and pattern
//! matching.
//!
//! # Design Notes
//!
//! - Timestamps are monotonic-clock nanoseconds ([`Nanos`]); they are chosen
//!   by the producer and carried verbatim.
//! - [`Source`] is a bitmask whose low bits are *class* flags; a source
//!   belongs to the pointer class when [`Source::CLASS_POINTER`] is set.
//! - Key codes, scan codes, flags, and meta state are opaque to the
//!   transport and carried as raw integers.

use bitflags::bitflags;

use crate::motion::MotionEvent;

/// Monotonic-clock timestamp in nanoseconds.
pub type Nanos = i64;

/// Canonical input event.
///
/// The transport consumer produces exactly one of these per delivered
/// message (or per drained motion batch).
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// A keyboard event.
    Key(KeyEvent),

    /// A pointer/motion event, possibly carrying historical samples.
    Motion(MotionEvent),

    /// Window focus gained or lost.
    Focus(FocusEvent),

    /// Pointer capture enabled or disabled for the window.
    Capture(CaptureEvent),

    /// A drag-and-drop location update.
    Drag(DragEvent),

    /// The system entered or left touch mode.
    TouchMode(TouchModeEvent),
}

impl InputEvent {
    /// The producer-assigned event id, whatever the kind.
    #[must_use]
    pub fn event_id(&self) -> i32 {
        match self {
            InputEvent::Key(e) => e.event_id,
            InputEvent::Motion(e) => e.event_id,
            InputEvent::Focus(e) => e.event_id,
            InputEvent::Capture(e) => e.event_id,
            InputEvent::Drag(e) => e.event_id,
            InputEvent::TouchMode(e) => e.event_id,
        }
    }
}

bitflags! {
    /// Input source bitmask.
    ///
    /// The low byte holds class flags; concrete sources are class flags
    /// combined with a device bit. Unrecognized bits are preserved.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Source: u32 {
        /// Button-like source (keys).
        const CLASS_BUTTON = 0x0000_0001;
        /// Pointer source: absolute coordinates on a display surface.
        const CLASS_POINTER = 0x0000_0002;
        /// Relative navigation source.
        const CLASS_NAVIGATION = 0x0000_0004;
        /// Absolute position source that is not display-bound.
        const CLASS_POSITION = 0x0000_0008;
        /// Joystick axes.
        const CLASS_JOYSTICK = 0x0000_0010;

        /// Keyboard.
        const KEYBOARD = 0x0000_0101;
        /// Directional pad.
        const DPAD = 0x0000_0201;
        /// Touch screen.
        const TOUCHSCREEN = 0x0000_1002;
        /// Mouse.
        const MOUSE = 0x0000_2002;
        /// Stylus.
        const STYLUS = 0x0000_4002;
        /// Trackball.
        const TRACKBALL = 0x0001_0004;
        /// Touch pad (no display binding).
        const TOUCHPAD = 0x0010_0008;
        /// Joystick.
        const JOYSTICK = 0x0100_0010;
        /// Rotary encoder.
        const ROTARY_ENCODER = 0x0040_0000;
    }
}

impl Source {
    /// Whether this source belongs to the pointer class (touch, stylus,
    /// mouse). Pointer-class motion streams are the only ones that batch
    /// and resample.
    #[must_use]
    pub const fn is_pointer(self) -> bool {
        self.contains(Source::CLASS_POINTER)
    }
}

impl Default for Source {
    fn default() -> Self {
        Source::empty()
    }
}

/// Key event action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyAction {
    /// Key went down.
    #[default]
    Down,
    /// Key came up.
    Up,
    /// Complex string or repeated-character event.
    Multiple,
    /// Unrecognized action code, carried verbatim.
    Other(u32),
}

impl KeyAction {
    /// Decode from the raw wire value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => KeyAction::Down,
            1 => KeyAction::Up,
            2 => KeyAction::Multiple,
            other => KeyAction::Other(other),
        }
    }

    /// The raw wire value.
    #[must_use]
    pub const fn to_raw(self) -> u32 {
        match self {
            KeyAction::Down => 0,
            KeyAction::Up => 1,
            KeyAction::Multiple => 2,
            KeyAction::Other(raw) => raw,
        }
    }
}

/// A keyboard event.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyEvent {
    /// Producer-assigned event id.
    pub event_id: i32,
    /// Originating device.
    pub device_id: i32,
    /// Source the event was generated from.
    pub source: Source,
    /// Display the event is targeted at.
    pub display_id: i32,
    /// Integrity tag computed by the producer; opaque to the transport.
    pub hmac: [u8; 32],
    /// Down, up, or multiple.
    pub action: KeyAction,
    /// Opaque policy flags.
    pub flags: u32,
    /// Symbolic key code.
    pub key_code: i32,
    /// Hardware scan code.
    pub scan_code: i32,
    /// Meta key state at the time of the event.
    pub meta_state: u32,
    /// Number of repeats for a held key.
    pub repeat_count: i32,
    /// When the key initially went down.
    pub down_time: Nanos,
    /// When this event happened.
    pub event_time: Nanos,
}

impl Default for KeyEvent {
    fn default() -> Self {
        Self {
            event_id: 0,
            device_id: 0,
            source: Source::KEYBOARD,
            display_id: 0,
            hmac: [0; 32],
            action: KeyAction::Down,
            flags: 0,
            key_code: 0,
            scan_code: 0,
            meta_state: 0,
            repeat_count: 0,
            down_time: 0,
            event_time: 0,
        }
    }
}

impl KeyEvent {
    /// Create a key event with the given action and key code.
    #[must_use]
    pub fn new(action: KeyAction, key_code: i32) -> Self {
        Self {
            action,
            key_code,
            ..Self::default()
        }
    }

    /// Set the event time.
    #[must_use]
    pub fn with_event_time(mut self, event_time: Nanos) -> Self {
        self.event_time = event_time;
        self
    }

    /// Set the originating device.
    #[must_use]
    pub fn with_device_id(mut self, device_id: i32) -> Self {
        self.device_id = device_id;
        self
    }
}

/// Window focus gained or lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusEvent {
    /// Producer-assigned event id.
    pub event_id: i32,
    /// `true` when focus was gained.
    pub has_focus: bool,
}

/// Pointer capture enabled or disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureEvent {
    /// Producer-assigned event id.
    pub event_id: i32,
    /// `true` when the window now owns pointer capture.
    pub pointer_capture_enabled: bool,
}

/// A drag-and-drop location update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragEvent {
    /// Producer-assigned event id.
    pub event_id: i32,
    /// Drag location, window-relative.
    pub x: f32,
    /// Drag location, window-relative.
    pub y: f32,
    /// `true` when the drag is leaving the window.
    pub is_exiting: bool,
}

/// The system entered or left touch mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchModeEvent {
    /// Producer-assigned event id.
    pub event_id: i32,
    /// `true` while the device is in touch mode.
    pub is_in_touch_mode: bool,
}
