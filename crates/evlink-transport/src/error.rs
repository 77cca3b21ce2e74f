#![forbid(unsafe_code)]

//! Transport error type.
//!
//! Every fallible transport operation returns [`Result`]. The variants
//! partition into the categories callers dispatch on:
//!
//! - [`TransportError::WouldBlock`] is transient: the socket is empty or
//!   full and the operation should be retried on the next loop tick.
//! - [`TransportError::DeadObject`] means the peer is gone; the channel is
//!   unusable and should be unregistered.
//! - [`TransportError::BadValue`], [`TransportError::UnexpectedMessage`]
//!   are protocol violations surfaced to the caller.
//! - [`TransportError::NoMemory`] reports an event factory refusal.
//! - [`TransportError::Os`] carries any other raw OS error.
//!
//! Conditions that indicate a bug in the calling layer (duplicate
//! acknowledgement, missing consume time, failed stream verification)
//! panic instead of returning: crashing early beats silently corrupting
//! the event stream.

use nix::errno::Errno;
use thiserror::Error;

/// Result alias used throughout the transport.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors surfaced by channel, publisher, and consumer operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The socket is empty (receive) or full (send); retry later.
    #[error("operation would block")]
    WouldBlock,

    /// The peer endpoint is closed or the connection is broken.
    #[error("peer is gone")]
    DeadObject,

    /// A malformed message, size mismatch, or invalid argument.
    #[error("invalid message or argument")]
    BadValue,

    /// The event factory refused to construct an event.
    #[error("event factory refused allocation")]
    NoMemory,

    /// A message type arrived on the wrong direction of the channel.
    #[error("unexpected message type from peer")]
    UnexpectedMessage,

    /// An unanticipated OS error.
    #[error("system error: {0}")]
    Os(#[from] Errno),
}
