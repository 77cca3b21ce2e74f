#![forbid(unsafe_code)]

//! Core: canonical input event values and the event construction seam.
//!
//! # Role in evlink
//! `evlink-core` is the event model. It owns the value types that cross the
//! transport boundary (keys, motion with sparse per-pointer coordinates,
//! focus, pointer capture, drag, touch mode) and the [`EventFactory`] trait
//! through which a consumer materializes them for the application.
//!
//! # Primary responsibilities
//! - **Event values**: [`InputEvent`] and the per-kind structs it wraps.
//! - **Motion model**: [`MotionEvent`] with historical samples, sparse
//!   [`PointerCoords`], tool types, and display transforms.
//! - **EventFactory**: the allocation seam between transport and application.
//!
//! # How it fits in the system
//! `evlink-transport` encodes these values onto the wire on the producer side
//! and reconstructs them through an [`EventFactory`] on the consumer side.
//! This crate is I/O-free and has no opinion about how events move.
//!
//! [`EventFactory`]: factory::EventFactory
//! [`InputEvent`]: event::InputEvent
//! [`MotionEvent`]: motion::MotionEvent
//! [`PointerCoords`]: motion::PointerCoords

pub mod event;
pub mod factory;
pub mod motion;

pub use event::{
    CaptureEvent, DragEvent, FocusEvent, InputEvent, KeyAction, KeyEvent, Nanos, Source,
    TouchModeEvent,
};
pub use factory::{DefaultEventFactory, EventFactory};
pub use motion::{
    MotionAction, MotionClassification, MotionEvent, Pointer, PointerCoords, PointerProperties,
    ToolType, Transform, AXIS_X, AXIS_Y, MAX_AXES, MAX_POINTERS, MAX_POINTER_ID,
};
