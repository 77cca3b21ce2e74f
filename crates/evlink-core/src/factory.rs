#![forbid(unsafe_code)]

//! The event construction seam between transport and application.
//!
//! A consumer does not hand raw wire data to the application; it asks an
//! [`EventFactory`] to materialize each event. The factory is where an
//! application can pool, wrap, or refuse events: returning `None` from any
//! constructor makes the consumer surface an out-of-memory condition to its
//! caller instead of delivering the event.
//!
//! [`DefaultEventFactory`] is the trivial policy that wraps every value
//! as-is and never refuses.

use crate::event::{
    CaptureEvent, DragEvent, FocusEvent, InputEvent, KeyEvent, TouchModeEvent,
};
use crate::motion::MotionEvent;

/// Polymorphic constructor for delivered events.
///
/// One method per event kind. Each receives the fully initialized value and
/// returns the [`InputEvent`] to deliver, or `None` to refuse the
/// allocation.
pub trait EventFactory {
    /// Construct a keyboard event.
    fn create_key_event(&mut self, event: KeyEvent) -> Option<InputEvent>;

    /// Construct a motion event (possibly carrying batched history and a
    /// trailing resampled sample).
    fn create_motion_event(&mut self, event: MotionEvent) -> Option<InputEvent>;

    /// Construct a focus event.
    fn create_focus_event(&mut self, event: FocusEvent) -> Option<InputEvent>;

    /// Construct a pointer-capture event.
    fn create_capture_event(&mut self, event: CaptureEvent) -> Option<InputEvent>;

    /// Construct a drag event.
    fn create_drag_event(&mut self, event: DragEvent) -> Option<InputEvent>;

    /// Construct a touch-mode event.
    fn create_touch_mode_event(&mut self, event: TouchModeEvent) -> Option<InputEvent>;
}

/// Factory that wraps every event value unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEventFactory;

impl EventFactory for DefaultEventFactory {
    fn create_key_event(&mut self, event: KeyEvent) -> Option<InputEvent> {
        Some(InputEvent::Key(event))
    }

    fn create_motion_event(&mut self, event: MotionEvent) -> Option<InputEvent> {
        Some(InputEvent::Motion(event))
    }

    fn create_focus_event(&mut self, event: FocusEvent) -> Option<InputEvent> {
        Some(InputEvent::Focus(event))
    }

    fn create_capture_event(&mut self, event: CaptureEvent) -> Option<InputEvent> {
        Some(InputEvent::Capture(event))
    }

    fn create_drag_event(&mut self, event: DragEvent) -> Option<InputEvent> {
        Some(InputEvent::Drag(event))
    }

    fn create_touch_mode_event(&mut self, event: TouchModeEvent) -> Option<InputEvent> {
        Some(InputEvent::TouchMode(event))
    }
}
