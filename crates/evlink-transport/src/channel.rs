#![forbid(unsafe_code)]

//! Channel: one endpoint of the transport socket pair.
//!
//! A [`Channel`] wraps a connected `AF_UNIX` / `SOCK_SEQPACKET` file
//! descriptor: reliable, bidirectional, and datagram-preserving, so every
//! read returns exactly one [`Message`] and there is no framing beyond the
//! message layout itself. Both endpoints are non-blocking; send and receive
//! buffers are capped so that a slow consumer exerts backpressure on the
//! producer instead of queueing unboundedly.
//!
//! # Failure Modes
//!
//! - An empty (receive) or full (send) socket is `WouldBlock`.
//! - EOF, a broken connection, or a short write on a datagram socket is
//!   `DeadObject`: the peer is gone and the channel should be torn down.
//! - A datagram that fails [`Message::decode`] is `BadValue` and dropped.

use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::socket::{recv, send, setsockopt, socketpair, sockopt, AddressFamily, MsgFlags, SockFlag, SockType};
use nix::unistd::{close, dup};
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::error::{Result, TransportError};
use crate::message::{Message, MAX_MESSAGE_SIZE};

/// Cap on the socket send/receive buffers. The kernel default is far larger
/// than needed; this only has to hold a few dozen large multi-pointer motion
/// messages when an application falls behind.
const SOCKET_BUFFER_SIZE: usize = 32 * 1024;

/// Opaque identity shared by the two endpoints of a pair.
///
/// The dispatcher uses it to correlate the endpoint it keeps with the one it
/// hands to the application. Tokens compare by identity, not value.
#[derive(Debug, Clone, Default)]
pub struct ConnectionToken(Arc<()>);

impl ConnectionToken {
    /// A fresh identity, unequal to every existing token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether two tokens denote the same pair.
    #[must_use]
    pub fn is_same(&self, other: &ConnectionToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// One endpoint of a transport socket pair.
///
/// The channel exclusively owns its file descriptor and closes it on drop.
/// All operations take `&self`; a channel must still only be driven from
/// one thread at a time.
#[derive(Debug)]
pub struct Channel {
    name: String,
    fd: RawFd,
    token: ConnectionToken,
}

impl Channel {
    /// Wrap an existing socket fd, taking ownership and making it
    /// non-blocking. The fd is closed if this fails.
    pub fn new(name: impl Into<String>, fd: RawFd, token: ConnectionToken) -> Result<Self> {
        let name = name.into();
        if let Err(errno) = fcntl(fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK)) {
            let _ = close(fd);
            error!(channel = %name, %errno, "could not make socket non-blocking");
            return Err(errno.into());
        }
        debug!(channel = %name, fd, "channel created");
        Ok(Self { name, fd, token })
    }

    /// Create a connected channel pair sharing one [`ConnectionToken`].
    ///
    /// The producer keeps one endpoint (named `" (server)"`) and sends the
    /// other (`" (client)"`) to the consuming process.
    pub fn pair(name: &str) -> Result<(Channel, Channel)> {
        let (server_fd, client_fd) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::empty(),
        )
        .map_err(|errno| {
            error!(channel = %name, %errno, "could not create socket pair");
            TransportError::from(errno)
        })?;

        // Best effort: an uncapped buffer still works, it just buffers more.
        for fd in [server_fd, client_fd] {
            let _ = setsockopt(fd, sockopt::SndBuf, &SOCKET_BUFFER_SIZE);
            let _ = setsockopt(fd, sockopt::RcvBuf, &SOCKET_BUFFER_SIZE);
        }

        let token = ConnectionToken::new();
        let server = Channel::new(format!("{name} (server)"), server_fd, token.clone());
        let server = match server {
            Ok(server) => server,
            Err(err) => {
                let _ = close(client_fd);
                return Err(err);
            }
        };
        let client = Channel::new(format!("{name} (client)"), client_fd, token)?;
        Ok((server, client))
    }

    /// The endpoint name, for logs and dumps.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The identity shared with the peer endpoint.
    #[must_use]
    pub fn token(&self) -> &ConnectionToken {
        &self.token
    }

    /// Send one message as a single datagram.
    ///
    /// Never blocks. A full socket is `WouldBlock`; the caller retries once
    /// the peer has drained. A short write can only mean the peer side is
    /// being torn down, so it maps to `DeadObject`.
    pub fn send(&self, msg: &Message) -> Result<()> {
        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        let len = msg.encode(&mut buf);
        let sent = loop {
            match send(
                self.fd,
                &buf[..len],
                MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_NOSIGNAL,
            ) {
                Ok(n) => break n,
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    debug!(
                        channel = %self.name,
                        message_type = ?msg.message_type(),
                        %errno,
                        "error sending message"
                    );
                    return Err(map_send_errno(errno));
                }
            }
        };
        if sent != len {
            debug!(
                channel = %self.name,
                message_type = ?msg.message_type(),
                sent,
                len,
                "send was incomplete"
            );
            return Err(TransportError::DeadObject);
        }
        trace!(
            channel = %self.name,
            message_type = ?msg.message_type(),
            seq = msg.seq,
            "sent message"
        );
        Ok(())
    }

    /// Receive one datagram and decode it.
    ///
    /// Never blocks. An empty socket is `WouldBlock`; EOF is `DeadObject`;
    /// a datagram that does not decode is `BadValue`.
    pub fn receive(&self) -> Result<Message> {
        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        let read = loop {
            match recv(self.fd, &mut buf, MsgFlags::MSG_DONTWAIT) {
                Ok(n) => break n,
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    debug!(channel = %self.name, %errno, "receive failed");
                    return Err(map_receive_errno(errno));
                }
            }
        };
        if read == 0 {
            debug!(channel = %self.name, "receive failed because peer was closed");
            return Err(TransportError::DeadObject);
        }
        let msg = Message::decode(&buf[..read]).inspect_err(|_| {
            error!(channel = %self.name, len = read, "received invalid message");
        })?;
        trace!(
            channel = %self.name,
            message_type = ?msg.message_type(),
            seq = msg.seq,
            "received message"
        );
        Ok(msg)
    }

    /// Best-effort readability check: a zero-timeout poll for input.
    ///
    /// Every outcome other than a clean `POLLIN` (errors, hangup, nothing
    /// pending) reads as "no"; a false negative only delays delivery to the
    /// next tick.
    #[must_use]
    pub fn probably_has_input(&self) -> bool {
        let mut fds = [PollFd::new(self.fd, PollFlags::POLLIN)];
        match poll(&mut fds, 0) {
            Ok(n) if n > 0 => fds[0]
                .revents()
                .unwrap_or(PollFlags::empty())
                .contains(PollFlags::POLLIN),
            _ => false,
        }
    }

    /// Block until the channel is readable or `timeout` elapses.
    ///
    /// Interrupted polls are restarted with the remaining time. This is the
    /// only blocking primitive on a channel and stays off the hot path.
    pub fn wait_for_message(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut remaining = timeout;
        loop {
            let mut fds = [PollFd::new(self.fd, PollFlags::POLLIN)];
            let ret = poll(&mut fds, duration_to_ms(remaining));
            remaining = deadline.saturating_duration_since(Instant::now());
            match ret {
                Err(Errno::EINTR) if !remaining.is_zero() => continue,
                _ => break,
            }
        }
    }

    /// Duplicate this endpoint onto a fresh file descriptor.
    ///
    /// # Panics
    ///
    /// Panics if the process is out of file descriptors (EMFILE/ENFILE).
    /// Surfacing that as an ordinary error would defer the crash to an
    /// unrelated call site; failing here keeps the leak visible.
    pub fn try_clone(&self) -> Result<Channel> {
        let fd = match dup(self.fd) {
            Ok(fd) => fd,
            Err(errno) => {
                error!(channel = %self.name, %errno, "could not duplicate channel fd");
                assert!(
                    errno != Errno::EMFILE && errno != Errno::ENFILE,
                    "too many open files, could not duplicate channel '{}'",
                    self.name
                );
                return Err(errno.into());
            }
        };
        Channel::new(self.name.clone(), fd, self.token.clone())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        debug!(channel = %self.name, fd = self.fd, "channel destroyed");
        let _ = close(self.fd);
    }
}

fn map_send_errno(errno: Errno) -> TransportError {
    match errno {
        Errno::EAGAIN => TransportError::WouldBlock,
        Errno::EPIPE | Errno::ENOTCONN | Errno::ECONNREFUSED | Errno::ECONNRESET => {
            TransportError::DeadObject
        }
        other => TransportError::Os(other),
    }
}

fn map_receive_errno(errno: Errno) -> TransportError {
    match errno {
        Errno::EAGAIN => TransportError::WouldBlock,
        Errno::EPIPE | Errno::ENOTCONN | Errno::ECONNREFUSED => TransportError::DeadObject,
        other => TransportError::Os(other),
    }
}

fn duration_to_ms(duration: Duration) -> i32 {
    let ms = duration.as_millis();
    if ms > i32::MAX as u128 {
        i32::MAX
    } else {
        ms as i32
    }
}
