/* -------------------------------------------------------------------------- *\
 *                |   █████╗ ██╗   ██╗██████╗  █████╗ ███████╗ |              *
 *                |  ██╔══██╗██║   ██║██╔══██╗██╔══██╗██╔════╝ |              *
 *                |  ███████║██║   ██║██████╔╝███████║█████╗   |              *
 *                |  ██╔══██║██║   ██║██╔══██╗██╔══██║██╔══╝   |              *
 *                |  ██║  ██║╚██████╔╝██║  ██║██║  ██║███████╗ |              *
 *                |  ╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝╚══════╝ |              *
 *                +--------------------------------------------+              *
 *                                                                            *
 *                         Distributed Systems Runtime                        *
 * -------------------------------------------------------------------------- *
 * Copyright 2022 - 2024, the aurae contributors                              *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */
//! The channel between the legacy hierarchy's release agent and the daemon.
//!
//! The kernel runs `sessiond-cgroups-agent <cgroup>` when a cgroup with
//! `notify_on_release` set loses its last process. The agent forwards the
//! path as a single datagram, which the event loop turns into an empty
//! notification.

use nix::sys::stat::{umask, Mode};
use std::io;
use std::os::unix::net::UnixDatagram as StdUnixDatagram;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::net::UnixDatagram;

/// Where the daemon listens for agent messages.
pub const AGENT_SOCKET: &str = "/run/systemd/cgroups-agent";

/// Longest cgroup path a message may carry.
pub const MESSAGE_MAX: usize = libc::PATH_MAX as usize;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("got zero-length cgroups agent message")]
    Empty,
    #[error("got cgroups agent message longer than {MESSAGE_MAX} bytes")]
    TooLong,
    #[error("got cgroups agent message with embedded NUL byte")]
    EmbeddedNul,
    #[error("got cgroups agent message that is not UTF-8")]
    NotUtf8,
    #[error("failed to bind cgroups agent socket '{}': {source}", path.display())]
    Bind { path: PathBuf, source: io::Error },
    #[error("failed to send cgroups agent message to '{}': {source}", path.display())]
    Send { path: PathBuf, source: io::Error },
    #[error("cgroups agent message truncated: sent {sent} of {len} bytes")]
    Truncated { sent: usize, len: usize },
}

/// Binds the daemon's end of the channel. A stale socket is replaced, and
/// only root may send to the new one.
pub fn bind(path: &Path) -> Result<UnixDatagram> {
    let bind_error =
        |source: io::Error| AgentError::Bind { path: path.to_path_buf(), source };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(bind_error)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(bind_error(e)),
    }

    let previous = umask(Mode::from_bits_truncate(0o077));
    let socket = UnixDatagram::bind(path);
    let _ = umask(previous);
    socket.map_err(bind_error)
}

/// Receive buffer for [parse_message]; one byte longer than the longest
/// valid message so that overlong ones can be told apart.
pub fn message_buffer() -> Vec<u8> {
    vec![0; MESSAGE_MAX + 1]
}

/// The cgroup path carried by a received datagram.
pub fn parse_message(message: &[u8]) -> Result<String> {
    if message.is_empty() {
        return Err(AgentError::Empty);
    }
    if message.len() > MESSAGE_MAX {
        return Err(AgentError::TooLong);
    }
    if message.contains(&0) {
        return Err(AgentError::EmbeddedNul);
    }
    String::from_utf8(message.to_vec()).map_err(|_| AgentError::NotUtf8)
}

/// Sends `cgroup` to the daemon listening on `socket`.
pub fn send(socket: &Path, cgroup: &str) -> Result<()> {
    let send_error =
        |source: io::Error| AgentError::Send { path: socket.to_path_buf(), source };

    let sender = StdUnixDatagram::unbound().map_err(send_error)?;
    let sent = sender.send_to(cgroup.as_bytes(), socket).map_err(send_error)?;
    if sent != cgroup.len() {
        return Err(AgentError::Truncated { sent, len: cgroup.len() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case(&b""[..], "zero-length"; "empty")]
    #[test_case(&b"/a\0b"[..], "NUL"; "embedded nul")]
    #[test_case(&b"/\xff"[..], "UTF-8"; "invalid utf8")]
    #[test]
    fn bad_messages_are_rejected(message: &[u8], reason: &str) {
        let err = parse_message(message).expect_err("rejected");
        assert!(err.to_string().contains(reason), "{err}");
    }

    #[test]
    fn overlong_messages_are_rejected() {
        let message = vec![b'a'; MESSAGE_MAX + 1];
        assert!(matches!(parse_message(&message), Err(AgentError::TooLong)));
    }

    #[test]
    fn messages_carry_the_path() {
        assert_eq!(
            parse_message(b"/user.slice/session-2.scope").expect("path"),
            "/user.slice/session-2.scope"
        );
    }

    #[tokio::test]
    async fn sent_paths_arrive() {
        let path = std::env::temp_dir()
            .join(format!("sessiond-agent-{}", uuid::Uuid::new_v4()))
            .join("cgroups-agent");
        let socket = bind(&path).expect("bind");

        send(&path, "/session-7.scope").expect("send");

        let mut buf = message_buffer();
        let n = socket.recv(&mut buf).await.expect("recv");
        assert_eq!(parse_message(&buf[..n]).expect("path"), "/session-7.scope");

        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }
}
