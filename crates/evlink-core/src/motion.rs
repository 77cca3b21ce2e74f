#![forbid(unsafe_code)]

//! Motion events and sparse pointer coordinates.
//!
//! A [`MotionEvent`] describes one gesture step for one or more pointers.
//! It carries a fixed set of per-event properties (device, source, action,
//! buttons, transforms) plus a growable list of *samples*: the coordinates
//! of every pointer at successive instants. The newest sample is the
//! event's nominal position; earlier samples are history available to the
//! application for curve reconstruction.
//!
//! # Coordinates
//!
//! [`PointerCoords`] is a sparse map from axis id to value: a 64-bit
//! presence bitmap plus a packed array holding one `f32` per present axis,
//! in ascending axis order. Axes that were never written read as `0.0`.
//!
//! # Actions
//!
//! The raw action word packs the gesture transition in its low byte and,
//! for pointer-indexed transitions (secondary pointer down/up), the index
//! of the affected pointer in the next byte. [`MotionEvent::masked_action`]
//! and [`MotionEvent::action_pointer_index`] split it apart.

use crate::event::{Nanos, Source};

/// Maximum number of pointers a single motion event can carry.
pub const MAX_POINTERS: usize = 16;

/// Number of addressable axes per pointer.
pub const MAX_AXES: usize = 30;

/// Largest valid pointer id.
pub const MAX_POINTER_ID: usize = 31;

/// Horizontal position axis.
pub const AXIS_X: u32 = 0;
/// Vertical position axis.
pub const AXIS_Y: u32 = 1;
/// Normalized pressure axis.
pub const AXIS_PRESSURE: u32 = 2;
/// Normalized contact size axis.
pub const AXIS_SIZE: u32 = 3;
/// Major axis of the touch ellipse.
pub const AXIS_TOUCH_MAJOR: u32 = 4;
/// Minor axis of the touch ellipse.
pub const AXIS_TOUCH_MINOR: u32 = 5;
/// Orientation of the tool, radians.
pub const AXIS_ORIENTATION: u32 = 8;

/// Low byte of the action word: the gesture transition.
pub const ACTION_MASK: u32 = 0xff;
/// Byte of the action word holding the affected pointer index.
pub const ACTION_POINTER_INDEX_MASK: u32 = 0xff00;
/// Shift for [`ACTION_POINTER_INDEX_MASK`].
pub const ACTION_POINTER_INDEX_SHIFT: u32 = 8;

/// Gesture transition carried in the low byte of the action word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionAction {
    /// First pointer went down.
    Down,
    /// Last pointer came up.
    Up,
    /// One or more pointers moved.
    Move,
    /// The gesture was aborted; the application must undo its effects.
    Cancel,
    /// A press happened outside the window's bounds.
    Outside,
    /// An additional pointer went down mid-gesture.
    PointerDown,
    /// A non-final pointer came up mid-gesture.
    PointerUp,
    /// Hover movement with no pointer down.
    HoverMove,
    /// Scroll wheel or equivalent.
    Scroll,
    /// Hover entered the window.
    HoverEnter,
    /// Hover left the window.
    HoverExit,
    /// A button was pressed.
    ButtonPress,
    /// A button was released.
    ButtonRelease,
    /// Unrecognized transition, carried verbatim.
    Other(u32),
}

impl MotionAction {
    /// Decode the masked (low-byte) transition from a raw action word.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw & ACTION_MASK {
            0 => MotionAction::Down,
            1 => MotionAction::Up,
            2 => MotionAction::Move,
            3 => MotionAction::Cancel,
            4 => MotionAction::Outside,
            5 => MotionAction::PointerDown,
            6 => MotionAction::PointerUp,
            7 => MotionAction::HoverMove,
            8 => MotionAction::Scroll,
            9 => MotionAction::HoverEnter,
            10 => MotionAction::HoverExit,
            11 => MotionAction::ButtonPress,
            12 => MotionAction::ButtonRelease,
            other => MotionAction::Other(other),
        }
    }

    /// The masked transition value.
    #[must_use]
    pub const fn to_raw(self) -> u32 {
        match self {
            MotionAction::Down => 0,
            MotionAction::Up => 1,
            MotionAction::Move => 2,
            MotionAction::Cancel => 3,
            MotionAction::Outside => 4,
            MotionAction::PointerDown => 5,
            MotionAction::PointerUp => 6,
            MotionAction::HoverMove => 7,
            MotionAction::Scroll => 8,
            MotionAction::HoverEnter => 9,
            MotionAction::HoverExit => 10,
            MotionAction::ButtonPress => 11,
            MotionAction::ButtonRelease => 12,
            MotionAction::Other(raw) => raw,
        }
    }

    /// Build a full action word with a pointer index in the high byte.
    #[must_use]
    pub const fn with_pointer_index(self, index: usize) -> u32 {
        self.to_raw() | ((index as u32) << ACTION_POINTER_INDEX_SHIFT)
    }
}

/// The tool that generated a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ToolType {
    /// Tool could not be determined.
    #[default]
    Unknown,
    /// A finger on a touch surface.
    Finger,
    /// A stylus tip.
    Stylus,
    /// A mouse cursor.
    Mouse,
    /// The eraser end of a stylus.
    Eraser,
    /// A palm rejection candidate.
    Palm,
}

impl ToolType {
    /// Decode from the raw wire value. Unknown values map to `Unknown`.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => ToolType::Finger,
            2 => ToolType::Stylus,
            3 => ToolType::Mouse,
            4 => ToolType::Eraser,
            5 => ToolType::Palm,
            _ => ToolType::Unknown,
        }
    }

    /// The raw wire value.
    #[must_use]
    pub const fn to_raw(self) -> u32 {
        match self {
            ToolType::Unknown => 0,
            ToolType::Finger => 1,
            ToolType::Stylus => 2,
            ToolType::Mouse => 3,
            ToolType::Eraser => 4,
            ToolType::Palm => 5,
        }
    }
}

/// Gesture classification computed upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MotionClassification {
    /// No classification.
    #[default]
    None,
    /// The gesture is ambiguous and may be reclassified.
    AmbiguousGesture,
    /// A deep (force) press.
    DeepPress,
    /// Unrecognized classification, carried verbatim.
    Other(u32),
}

impl MotionClassification {
    /// Decode from the raw wire value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => MotionClassification::None,
            1 => MotionClassification::AmbiguousGesture,
            2 => MotionClassification::DeepPress,
            other => MotionClassification::Other(other),
        }
    }

    /// The raw wire value.
    #[must_use]
    pub const fn to_raw(self) -> u32 {
        match self {
            MotionClassification::None => 0,
            MotionClassification::AmbiguousGesture => 1,
            MotionClassification::DeepPress => 2,
            MotionClassification::Other(raw) => raw,
        }
    }
}

/// Sparse per-pointer axis values.
///
/// Present axes are recorded in a 64-bit bitmap; their values live in a
/// packed array ordered by ascending axis id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerCoords {
    bits: u64,
    values: [f32; MAX_AXES],
    /// Set when these coordinates were synthesized rather than reported by
    /// the device.
    pub is_resampled: bool,
}

impl Default for PointerCoords {
    fn default() -> Self {
        Self {
            bits: 0,
            values: [0.0; MAX_AXES],
            is_resampled: false,
        }
    }
}

impl PointerCoords {
    /// Coordinates with only X and Y set. The common case in tests and
    /// simple pointer streams.
    #[must_use]
    pub fn from_xy(x: f32, y: f32) -> Self {
        let mut coords = Self::default();
        coords.set_axis_value(AXIS_X, x);
        coords.set_axis_value(AXIS_Y, y);
        coords
    }

    /// Rebuild from the wire representation: a presence bitmap and the
    /// packed value array (`bits.count_ones()` entries).
    #[must_use]
    pub fn from_packed(bits: u64, packed: &[f32], is_resampled: bool) -> Self {
        let mut values = [0.0; MAX_AXES];
        let count = (bits.count_ones() as usize).min(MAX_AXES).min(packed.len());
        values[..count].copy_from_slice(&packed[..count]);
        Self {
            bits,
            values,
            is_resampled,
        }
    }

    /// The axis presence bitmap.
    #[must_use]
    pub const fn bits(&self) -> u64 {
        self.bits
    }

    /// The packed values for present axes, ascending axis order.
    #[must_use]
    pub fn packed_values(&self) -> &[f32] {
        &self.values[..(self.bits.count_ones() as usize).min(MAX_AXES)]
    }

    /// Value for `axis`, or `0.0` if the axis is not present.
    #[must_use]
    pub fn axis_value(&self, axis: u32) -> f32 {
        let bit = 1u64 << axis;
        if self.bits & bit == 0 {
            return 0.0;
        }
        self.values[(self.bits & (bit - 1)).count_ones() as usize]
    }

    /// Set `axis` to `value`, inserting it into the packed array if absent.
    pub fn set_axis_value(&mut self, axis: u32, value: f32) {
        debug_assert!((axis as usize) < MAX_AXES, "axis {axis} out of range");
        let bit = 1u64 << axis;
        let index = (self.bits & (bit - 1)).count_ones() as usize;
        if self.bits & bit == 0 {
            let count = self.bits.count_ones() as usize;
            let mut i = count.min(MAX_AXES - 1);
            while i > index {
                self.values[i] = self.values[i - 1];
                i -= 1;
            }
            self.bits |= bit;
        }
        self.values[index] = value;
    }

    /// Shorthand for [`AXIS_X`].
    #[must_use]
    pub fn x(&self) -> f32 {
        self.axis_value(AXIS_X)
    }

    /// Shorthand for [`AXIS_Y`].
    #[must_use]
    pub fn y(&self) -> f32 {
        self.axis_value(AXIS_Y)
    }
}

/// Stable per-pointer identity within a gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PointerProperties {
    /// Pointer id, stable while the pointer is down. At most
    /// [`MAX_POINTER_ID`].
    pub id: i32,
    /// Tool that generated this pointer.
    pub tool_type: ToolType,
}

/// One pointer of a motion sample: identity plus coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pointer {
    /// Identity, stable across the gesture.
    pub properties: PointerProperties,
    /// Sparse axis values for this sample.
    pub coords: PointerCoords,
}

/// A 2D affine transform, row-major `[dsdx dtdx tx; dtdy dsdy ty; 0 0 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub dsdx: f32,
    pub dtdx: f32,
    pub tx: f32,
    pub dtdy: f32,
    pub dsdy: f32,
    pub ty: f32,
}

impl Default for Transform {
    /// The identity transform.
    fn default() -> Self {
        Self {
            dsdx: 1.0,
            dtdx: 0.0,
            tx: 0.0,
            dtdy: 0.0,
            dsdy: 1.0,
            ty: 0.0,
        }
    }
}

impl Transform {
    /// Components in wire order.
    #[must_use]
    pub const fn to_array(self) -> [f32; 6] {
        [self.dsdx, self.dtdx, self.tx, self.dtdy, self.dsdy, self.ty]
    }

    /// Rebuild from wire order.
    #[must_use]
    pub const fn from_array(a: [f32; 6]) -> Self {
        Self {
            dsdx: a[0],
            dtdx: a[1],
            tx: a[2],
            dtdy: a[3],
            dsdy: a[4],
            ty: a[5],
        }
    }
}

/// A motion event: per-event properties plus one or more samples.
///
/// Samples are stored oldest-first; the last sample is the event's nominal
/// position and time. [`add_sample`](MotionEvent::add_sample) appends.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionEvent {
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
    /// Raw action word: masked transition plus pointer index.
    pub action: u32,
    /// The button affected by a press/release action.
    pub action_button: i32,
    /// Opaque policy flags.
    pub flags: u32,
    /// Edge flags for edge-touch detection.
    pub edge_flags: i32,
    /// Meta key state; ORed across coalesced samples.
    pub meta_state: u32,
    /// Currently pressed buttons.
    pub button_state: u32,
    /// Upstream gesture classification.
    pub classification: MotionClassification,
    /// Transform from raw coordinates into display space.
    pub transform: Transform,
    /// Horizontal precision of the reported coordinates.
    pub x_precision: f32,
    /// Vertical precision of the reported coordinates.
    pub y_precision: f32,
    /// Mouse cursor position, or NaN when not applicable.
    pub x_cursor_position: f32,
    /// Mouse cursor position, or NaN when not applicable.
    pub y_cursor_position: f32,
    /// Transform for the raw (unrotated) coordinate space.
    pub raw_transform: Transform,
    /// When the first pointer of the gesture went down.
    pub down_time: Nanos,

    pointer_properties: Vec<PointerProperties>,
    sample_event_times: Vec<Nanos>,
    sample_coords: Vec<PointerCoords>,
}

impl MotionEvent {
    /// Create an event with one initial sample.
    ///
    /// `coords` must hold exactly one entry per pointer property.
    /// Remaining per-event properties start at their defaults and are set
    /// by the caller via the public fields.
    #[must_use]
    pub fn new(
        pointer_properties: Vec<PointerProperties>,
        event_time: Nanos,
        coords: &[PointerCoords],
    ) -> Self {
        debug_assert_eq!(pointer_properties.len(), coords.len());
        Self {
            event_id: 0,
            device_id: 0,
            source: Source::TOUCHSCREEN,
            display_id: 0,
            hmac: [0; 32],
            action: MotionAction::Move.to_raw(),
            action_button: 0,
            flags: 0,
            edge_flags: 0,
            meta_state: 0,
            button_state: 0,
            classification: MotionClassification::None,
            transform: Transform::default(),
            x_precision: 0.0,
            y_precision: 0.0,
            x_cursor_position: f32::NAN,
            y_cursor_position: f32::NAN,
            raw_transform: Transform::default(),
            down_time: 0,
            pointer_properties,
            sample_event_times: vec![event_time],
            sample_coords: coords.to_vec(),
        }
    }

    /// Append a sample. `coords` must hold one entry per pointer.
    pub fn add_sample(&mut self, event_time: Nanos, coords: &[PointerCoords]) {
        debug_assert_eq!(coords.len(), self.pointer_count());
        self.sample_event_times.push(event_time);
        self.sample_coords.extend_from_slice(coords);
    }

    /// Number of pointers in every sample of this event.
    #[must_use]
    pub fn pointer_count(&self) -> usize {
        self.pointer_properties.len()
    }

    /// Per-pointer identity.
    #[must_use]
    pub fn pointer_properties(&self) -> &[PointerProperties] {
        &self.pointer_properties
    }

    /// Id of the pointer at `index`.
    #[must_use]
    pub fn pointer_id(&self, index: usize) -> i32 {
        self.pointer_properties[index].id
    }

    /// Tool type of the pointer at `index`.
    #[must_use]
    pub fn tool_type(&self, index: usize) -> ToolType {
        self.pointer_properties[index].tool_type
    }

    /// Number of samples carried, including the nominal one.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.sample_event_times.len()
    }

    /// Number of historical (non-nominal) samples.
    #[must_use]
    pub fn history_size(&self) -> usize {
        self.sample_count() - 1
    }

    /// Time of the newest sample.
    #[must_use]
    pub fn event_time(&self) -> Nanos {
        *self
            .sample_event_times
            .last()
            .expect("motion event always has at least one sample")
    }

    /// Time of the sample at `sample_index` (oldest first).
    #[must_use]
    pub fn sample_event_time(&self, sample_index: usize) -> Nanos {
        self.sample_event_times[sample_index]
    }

    /// Coordinates of `pointer_index` in the sample at `sample_index`.
    #[must_use]
    pub fn coords_at(&self, sample_index: usize, pointer_index: usize) -> &PointerCoords {
        &self.sample_coords[sample_index * self.pointer_count() + pointer_index]
    }

    /// Coordinates of `pointer_index` in the newest sample.
    #[must_use]
    pub fn coords(&self, pointer_index: usize) -> &PointerCoords {
        self.coords_at(self.sample_count() - 1, pointer_index)
    }

    /// The masked gesture transition.
    #[must_use]
    pub fn masked_action(&self) -> MotionAction {
        MotionAction::from_raw(self.action)
    }

    /// Index of the pointer a `PointerDown`/`PointerUp` action refers to.
    #[must_use]
    pub fn action_pointer_index(&self) -> usize {
        ((self.action & ACTION_POINTER_INDEX_MASK) >> ACTION_POINTER_INDEX_SHIFT) as usize
    }

    /// Id of the pointer a `PointerDown`/`PointerUp` action refers to.
    #[must_use]
    pub fn action_pointer_id(&self) -> i32 {
        self.pointer_properties[self.action_pointer_index()].id
    }
}
