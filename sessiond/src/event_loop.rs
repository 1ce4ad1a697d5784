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
//! The single thread that owns the [Manager].
//!
//! Everything that changes cgroup state arrives here as an [Event], an
//! inotify wakeup or an agent datagram. After each one the realize queue
//! and then the empty queue are drained.

use crate::agent::{self, AgentError};
use crate::cgroups::{BackendError, CgroupBackend, FsBackend, ResourceSpec};
use crate::manager::{CgroupsError, Manager, ManagerState};
use crate::units::{ActiveState, UnitId, UnitKind};
use nix::unistd::Pid;
use std::future;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::unix::{AsyncFd, AsyncFdReadyGuard};
use tokio::io::Interest;
use tokio::net::UnixDatagram;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, trace, warn};

#[derive(Error, Debug)]
pub enum EventLoopError {
    #[error("failed to set up cgroup watches: {0}")]
    Watch(#[source] BackendError),
    #[error("failed to register cgroup watches: {0}")]
    Register(#[source] io::Error),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("failed to listen for {signal}: {source}")]
    Signal { signal: &'static str, source: io::Error },
    #[error(transparent)]
    State(#[from] CgroupsError),
}

/// Requests from the session side of the daemon.
#[derive(Debug)]
pub enum Event {
    AddUnit {
        name: String,
        kind: UnitKind,
        slice: Option<String>,
        resources: Option<ResourceSpec>,
    },
    RemoveUnit {
        name: String,
    },
    SetResources {
        name: String,
        resources: ResourceSpec,
    },
    AttachPids {
        name: String,
        pids: Vec<Pid>,
        suffix: Option<String>,
    },
    /// A cgroup path was reported empty by some other source.
    CgroupEmpty(String),
}

/// The inotify descriptor owned by the backend, registered with the
/// reactor without handing over ownership.
#[derive(Debug)]
struct WatchFd(RawFd);

impl AsRawFd for WatchFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

#[derive(Debug)]
pub struct EventLoop {
    manager: Manager<FsBackend>,
    events: UnboundedReceiver<Event>,
    sender: UnboundedSender<Event>,
    agent_socket: PathBuf,
    state_file: PathBuf,
}

impl EventLoop {
    pub fn new(
        manager: Manager<FsBackend>,
        agent_socket: PathBuf,
        state_file: PathBuf,
    ) -> Self {
        let (sender, events) = unbounded_channel();
        Self { manager, events, sender, agent_socket, state_file }
    }

    /// A handle for queueing [Event]s from other tasks.
    pub fn sender(&self) -> UnboundedSender<Event> {
        self.sender.clone()
    }

    pub fn manager_mut(&mut self) -> &mut Manager<FsBackend> {
        &mut self.manager
    }

    /// Runs until SIGTERM or SIGINT, then saves the cgroup state.
    pub async fn run(self) -> Result<(), EventLoopError> {
        let EventLoop { mut manager, mut events, sender, agent_socket, state_file } =
            self;

        let watch_fd = match manager
            .backend_mut()
            .init_watches()
            .map_err(EventLoopError::Watch)?
        {
            Some(fd) => Some(
                AsyncFd::with_interest(WatchFd(fd), Interest::READABLE)
                    .map_err(EventLoopError::Register)?,
            ),
            None => None,
        };
        let agent = if manager.backend().hierarchy().has_events() {
            None
        } else {
            Some(agent::bind(&agent_socket)?)
        };

        let mut sigterm = signal(SignalKind::terminate()).map_err(|source| {
            EventLoopError::Signal { signal: "SIGTERM", source }
        })?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(|source| {
            EventLoopError::Signal { signal: "SIGINT", source }
        })?;

        manager.set_state(ManagerState::Running);
        dispatch_queues(&mut manager);
        info!("cgroup event loop running");

        let mut buf = agent::message_buffer();
        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("received SIGTERM");
                    break;
                }
                _ = sigint.recv() => {
                    info!("received SIGINT");
                    break;
                }
                Some(event) = events.recv() => handle_event(&mut manager, event),
                guard = watch_readable(watch_fd.as_ref()) => match guard {
                    Ok(guard) => dispatch_watch_events(&mut manager, guard),
                    Err(e) => warn!("failed to wait for cgroup watches: {e}"),
                },
                received = agent_recv(agent.as_ref(), &mut buf) => match received {
                    Ok(n) => match agent::parse_message(&buf[..n]) {
                        Ok(path) => {
                            let _ = manager.notify_empty(&path);
                        }
                        Err(e) => error!("{e}, ignoring"),
                    },
                    Err(e) => error!("failed to read cgroups agent message: {e}"),
                },
            }
            dispatch_queues(&mut manager);
        }
        drop(sender);

        manager.set_state(ManagerState::Stopping);
        if let Some(agent) = agent {
            drop(agent);
            let _ = std::fs::remove_file(&agent_socket);
        }
        manager.snapshot().save(&state_file)?;
        info!("saved cgroup state to {}", state_file.display());
        Ok(())
    }
}

async fn watch_readable(
    fd: Option<&AsyncFd<WatchFd>>,
) -> io::Result<AsyncFdReadyGuard<'_, WatchFd>> {
    match fd {
        Some(fd) => fd.readable().await,
        None => future::pending().await,
    }
}

async fn agent_recv(
    socket: Option<&UnixDatagram>,
    buf: &mut [u8],
) -> io::Result<usize> {
    match socket {
        Some(socket) => socket.recv(buf).await,
        None => future::pending().await,
    }
}

/// Reads inotify batches until none is pending. Readiness is edge
/// triggered, so it is only cleared once the descriptor would block.
fn dispatch_watch_events(
    manager: &mut Manager<FsBackend>,
    mut guard: AsyncFdReadyGuard<'_, WatchFd>,
) {
    loop {
        match manager.backend_mut().read_watch_events() {
            Ok(Some(tokens)) => {
                for token in tokens {
                    let _ = manager.notify_watch(token);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("{e}");
                break;
            }
        }
    }
    guard.clear_ready();
}

/// Applies one request to the manager. Failures concern that request only
/// and are logged.
pub fn handle_event<B: CgroupBackend>(manager: &mut Manager<B>, event: Event) {
    trace!("handling {event:?}");
    let result = match event {
        Event::AddUnit { name, kind, slice, resources } => manager
            .add_unit(&name, kind, slice.as_deref(), resources)
            .map(|id| manager.enqueue_realize(id)),
        Event::RemoveUnit { name } => manager
            .lookup(&name)
            .and_then(|id| {
                manager.prune_cgroup(id);
                manager.remove_unit(id)
            }),
        Event::SetResources { name, resources } => manager
            .lookup(&name)
            .and_then(|id| manager.set_resources(id, resources)),
        Event::AttachPids { name, pids, suffix } => manager
            .lookup(&name)
            .and_then(|id| manager.attach_pids(id, &pids, suffix.as_deref())),
        Event::CgroupEmpty(path) => {
            let _ = manager.notify_empty(&path);
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!("{e}");
    }
}

/// Realizes everything pending, then collects emptied units.
pub fn dispatch_queues<B: CgroupBackend>(manager: &mut Manager<B>) {
    let realized = manager.drain_realize_queue();
    if realized > 0 {
        debug!("realized {realized} queued units");
    }
    while let Some(id) = manager.pop_empty() {
        collect_empty(manager, id);
    }
}

/// Default handling of an emptied unit: it is over, so its cgroup goes.
/// Slices live on without processes.
fn collect_empty<B: CgroupBackend>(manager: &mut Manager<B>, id: UnitId) {
    let Some(unit) = manager.units().get(id) else {
        return;
    };
    if unit.is_slice() {
        return;
    }
    info!("cgroup of {} is empty", unit.name());

    if let Err(e) = manager.set_active_state(id, ActiveState::Inactive) {
        warn!("{e}");
    }
    manager.prune_cgroup(id);
}
