#![forbid(unsafe_code)]

//! Touch history and resampling.
//!
//! A consumer keeps a short per-`{device, source}` history of pointer-class
//! motion samples. When it delivers a batched move, it appends one
//! *resampled* sample whose timestamp is shifted toward the display frame
//! time: interpolated when a later real sample is already queued,
//! extrapolated (within strict bounds) when it is not. The result is that
//! scrolling content tracks the finger at the cadence of the display rather
//! than the cadence of the touch controller.
//!
//! # Invariants
//!
//! 1. Extrapolation never predicts more than
//!    `min(delta / 2, RESAMPLE_MAX_PREDICTION)` past the newest real sample.
//! 2. Once a resampled coordinate has been delivered for a pointer, later
//!    real samples that lie in its past (or that repeat the same position)
//!    are rewritten to it, so the application never observes the pointer
//!    jumping backwards.
//! 3. A pointer whose recent real samples are identical keeps its previous
//!    resampled coordinates; unmoving pointers do not jitter.
//! 4. Only finger and unknown tools are resampled; stylus and mouse
//!    positions are delivered exactly as reported.

use evlink_core::event::Nanos;
use evlink_core::motion::{
    MotionEvent, PointerCoords, ToolType, AXIS_X, AXIS_Y, MAX_POINTERS, MAX_POINTER_ID,
};
use evlink_core::Source;
use tracing::trace;

use crate::message::MotionBody;

const NANOS_PER_MS: Nanos = 1_000_000;

/// Latency subtracted from the frame time before picking samples. A few
/// milliseconds reduces the impact of mispredicted touch positions.
pub(crate) const RESAMPLE_LATENCY: Nanos = 5 * NANOS_PER_MS;

/// Minimum spacing between samples for resampling to be meaningful.
pub(crate) const RESAMPLE_MIN_DELTA: Nanos = 2 * NANOS_PER_MS;

/// Maximum spacing between samples before extrapolation stops being
/// trustworthy.
pub(crate) const RESAMPLE_MAX_DELTA: Nanos = 20 * NANOS_PER_MS;

/// Hard cap on how far ahead of the newest real sample extrapolation may
/// predict; further bounded by half the observed sample spacing.
pub(crate) const RESAMPLE_MAX_PREDICTION: Nanos = 8 * NANOS_PER_MS;

fn lerp(a: f32, b: f32, alpha: f32) -> f32 {
    a + alpha * (b - a)
}

fn should_resample_tool(tool_type: ToolType) -> bool {
    tool_type == ToolType::Finger || tool_type == ToolType::Unknown
}

/// Small fixed-capacity pointer-id set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct IdBits(u32);

impl IdBits {
    pub(crate) fn has(self, id: u32) -> bool {
        debug_assert!(id as usize <= MAX_POINTER_ID);
        self.0 & (1 << id) != 0
    }

    pub(crate) fn mark(&mut self, id: u32) {
        debug_assert!(id as usize <= MAX_POINTER_ID);
        self.0 |= 1 << id;
    }

    pub(crate) fn clear_bit(&mut self, id: u32) {
        debug_assert!(id as usize <= MAX_POINTER_ID);
        self.0 &= !(1 << id);
    }

    pub(crate) fn clear(&mut self) {
        self.0 = 0;
    }
}

/// One remembered motion sample: time plus per-pointer coordinates,
/// addressable by pointer id.
#[derive(Debug, Clone)]
pub(crate) struct History {
    pub(crate) event_time: Nanos,
    pub(crate) ids: IdBits,
    id_to_index: [u8; MAX_POINTER_ID + 1],
    pointers: [PointerCoords; MAX_POINTERS],
}

impl Default for History {
    fn default() -> Self {
        Self {
            event_time: 0,
            ids: IdBits::default(),
            id_to_index: [0; MAX_POINTER_ID + 1],
            pointers: [PointerCoords::default(); MAX_POINTERS],
        }
    }
}

impl History {
    fn set_from(&mut self, msg: &MotionBody) {
        self.event_time = msg.event_time;
        self.ids.clear();
        for (index, pointer) in msg.pointers.iter().enumerate() {
            let id = pointer.properties.id as u32;
            self.ids.mark(id);
            self.id_to_index[id as usize] = index as u8;
            self.pointers[index] = pointer.coords;
        }
    }

    pub(crate) fn pointer_by_id(&self, id: u32) -> &PointerCoords {
        debug_assert!(self.ids.has(id));
        &self.pointers[self.id_to_index[id as usize] as usize]
    }
}

/// Per-`{device, source}` resampling state: the last two real samples plus
/// the most recently produced resampled sample.
#[derive(Debug, Clone)]
pub(crate) struct TouchState {
    pub(crate) device_id: i32,
    pub(crate) source: Source,
    history: [History; 2],
    history_current: usize,
    history_size: usize,
    pub(crate) last_resample: History,
}

impl TouchState {
    pub(crate) fn new(device_id: i32, source: Source) -> Self {
        Self {
            device_id,
            source,
            history: [History::default(), History::default()],
            history_current: 0,
            history_size: 0,
            last_resample: History::default(),
        }
    }

    /// Reset for a fresh gesture on the same device/source.
    pub(crate) fn initialize(&mut self, device_id: i32, source: Source) {
        self.device_id = device_id;
        self.source = source;
        self.history_size = 0;
        self.last_resample = History::default();
    }

    pub(crate) fn add_history(&mut self, msg: &MotionBody) {
        self.history_current ^= 1;
        if self.history_size < 2 {
            self.history_size += 1;
        }
        let current = self.history_current;
        self.history[current].set_from(msg);
    }

    /// The remembered sample `age` steps back; `0` is the newest.
    pub(crate) fn history(&self, age: usize) -> &History {
        debug_assert!(age < self.history_size);
        &self.history[self.history_current ^ age]
    }

    pub(crate) fn history_size(&self) -> usize {
        self.history_size
    }

    /// Whether the last two real samples carry identical coordinates for
    /// `id`. Used both to keep unmoving pointers from jittering and to
    /// decide whether a delivered resample is still authoritative.
    pub(crate) fn recent_coordinates_are_identical(&self, id: u32) -> bool {
        if self.history_size < 2 {
            return false;
        }
        let newest = self.history(0);
        let previous = self.history(1);
        if !newest.ids.has(id) || !previous.ids.has(id) {
            return false;
        }
        let a = newest.pointer_by_id(id);
        let b = previous.pointer_by_id(id);
        a.x() == b.x() && a.y() == b.y()
    }
}

/// Substitute previously resampled coordinates into `msg` where they are
/// still authoritative.
///
/// For each pointer the delivered resample covers: if the incoming real
/// sample is older than the resample, or repeats the position the resample
/// was derived from, the resampled coordinates replace the reported ones
/// (the application has already seen the pointer there, and must not see it
/// move backwards). Otherwise the pointer has genuinely moved on and the
/// stale resample entry is invalidated.
pub(crate) fn rewrite_message(state: &mut TouchState, msg: &mut MotionBody) {
    let event_time = msg.event_time;
    for pointer in &mut msg.pointers {
        let id = pointer.properties.id as u32;
        if !state.last_resample.ids.has(id) {
            continue;
        }
        if event_time < state.last_resample.event_time
            || state.recent_coordinates_are_identical(id)
        {
            let resample_coords = state.last_resample.pointer_by_id(id);
            trace!(
                id,
                x = resample_coords.x(),
                y = resample_coords.y(),
                old_x = pointer.coords.x(),
                old_y = pointer.coords.y(),
                "rewrote pointer from last resample"
            );
            let (x, y) = (resample_coords.x(), resample_coords.y());
            pointer.coords.set_axis_value(AXIS_X, x);
            pointer.coords.set_axis_value(AXIS_Y, y);
            pointer.coords.is_resampled = true;
        } else {
            state.last_resample.ids.clear_bit(id);
        }
    }
}

/// Append a resampled sample at (up to) `sample_time` to `event`.
///
/// `next`, when present, is the first still-queued sample after the ones
/// already folded into `event`; its availability selects interpolation over
/// extrapolation. Does nothing when the preconditions for resampling do not
/// hold.
pub(crate) fn resample_touch_state(
    state: &mut TouchState,
    mut sample_time: Nanos,
    event: &mut MotionEvent,
    next: Option<&MotionBody>,
) {
    if state.history_size() < 1 {
        trace!("not resampled, no history for device");
        return;
    }

    // The newest real sample must cover every pointer the event delivers.
    let current = state.history(0).clone();
    let pointer_count = event.pointer_count();
    for i in 0..pointer_count {
        let id = event.pointer_id(i) as u32;
        if !current.ids.has(id) {
            trace!(id, "not resampled, missing pointer id");
            return;
        }
    }

    let other: History;
    let alpha: f32;
    if let Some(next) = next {
        // Interpolate between the newest folded sample and the queued one:
        // current.event_time <= sample_time <= future.event_time.
        let mut future = History::default();
        future.set_from(next);
        let delta = future.event_time - current.event_time;
        if delta < RESAMPLE_MIN_DELTA {
            trace!(delta, "not resampled, delta time is too small");
            return;
        }
        alpha = (sample_time - current.event_time) as f32 / delta as f32;
        other = future;
    } else if state.history_size() >= 2 {
        // Extrapolate past the newest sample using the one before it:
        // other.event_time <= current.event_time <= sample_time.
        let past = state.history(1).clone();
        let delta = current.event_time - past.event_time;
        if delta < RESAMPLE_MIN_DELTA {
            trace!(delta, "not resampled, delta time is too small");
            return;
        }
        if delta > RESAMPLE_MAX_DELTA {
            trace!(delta, "not resampled, delta time is too large");
            return;
        }
        let max_predict = current.event_time + (delta / 2).min(RESAMPLE_MAX_PREDICTION);
        if sample_time > max_predict {
            trace!(
                requested = sample_time - current.event_time,
                clamped = max_predict - current.event_time,
                "sample time is too far in the future, adjusting prediction"
            );
            sample_time = max_predict;
        }
        alpha = (current.event_time - sample_time) as f32 / delta as f32;
        other = past;
    } else {
        trace!("not resampled, insufficient data");
        return;
    }

    if current.event_time == sample_time {
        // A second sample with identical time and coordinates helps nobody.
        return;
    }

    let old_last_resample = state.last_resample.clone();
    state.last_resample.event_time = sample_time;
    state.last_resample.ids.clear();
    for i in 0..pointer_count {
        let id = event.pointer_id(i) as u32;
        state.last_resample.id_to_index[id as usize] = i as u8;
        state.last_resample.ids.mark(id);
        if old_last_resample.ids.has(id) && state.recent_coordinates_are_identical(id) {
            // The pointer has not moved since the previous resample, so keep
            // the previously delivered coordinates instead of recomputing
            // them; recomputation would wiggle a stationary pointer. The
            // is_resampled flag stays set: the values still do not match
            // what the device reported. The entry is copied rather than
            // reused in place because the id-to-index mapping may differ.
            state.last_resample.pointers[i] = *old_last_resample.pointer_by_id(id);
            continue;
        }

        let current_coords = *current.pointer_by_id(id);
        let mut resampled = current_coords;
        resampled.is_resampled = true;
        if other.ids.has(id) && should_resample_tool(event.tool_type(i)) {
            let other_coords = other.pointer_by_id(id);
            resampled.set_axis_value(AXIS_X, lerp(current_coords.x(), other_coords.x(), alpha));
            resampled.set_axis_value(AXIS_Y, lerp(current_coords.y(), other_coords.y(), alpha));
            trace!(
                id,
                out_x = resampled.x(),
                out_y = resampled.y(),
                cur_x = current_coords.x(),
                cur_y = current_coords.y(),
                other_x = other_coords.x(),
                other_y = other_coords.y(),
                alpha,
                "resampled pointer"
            );
        }
        state.last_resample.pointers[i] = resampled;
    }

    event.add_sample(sample_time, &state.last_resample.pointers[..pointer_count]);
}
