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

use pretty_assertions::assert_eq;
use sessiond::cgroups::weight::CpuWeight;
use sessiond::cgroups::{FsBackend, Hierarchy, ResourceSpec};
use sessiond::event_loop::{dispatch_queues, handle_event, Event};
use sessiond::manager::{Manager, ManagerState};
use sessiond::units::{ActiveState, UnitKind, ROOT_SLICE};
use test_helpers::ScratchCgroupFs;

const SESSION: &str = "/user.slice/session-1.scope";

// The kernel provides attribute files; the scratch tree needs them up front.
fn scratch() -> ScratchCgroupFs {
    let scratch = ScratchCgroupFs::unified(&["cpu", "io", "memory", "pids"]);
    let _ = scratch.touch("/", &["cgroup.subtree_control"]);
    let _ = scratch.touch(
        "/user.slice",
        &["cgroup.subtree_control", "cgroup.events", "pids.max"],
    );
    let _ = scratch.touch(
        SESSION,
        &[
            "cgroup.events",
            "cpu.weight",
            "cpu.max",
            "memory.low",
            "memory.high",
            "memory.max",
            "memory.swap.max",
            "pids.max",
        ],
    );
    scratch
}

fn session_manager(scratch: &ScratchCgroupFs) -> Manager<FsBackend> {
    let backend = FsBackend::with_hierarchy(scratch.path(), Hierarchy::Unified);
    let mut manager = Manager::new(backend, "").expect("manager");
    manager.set_state(ManagerState::Running);

    let _ = manager
        .add_unit(ROOT_SLICE, UnitKind::Slice, None, None)
        .expect("root slice");
    let _ = manager
        .add_unit("user.slice", UnitKind::Slice, Some(ROOT_SLICE), None)
        .expect("user slice");
    manager
}

#[test]
fn unified_session_must_receive_its_limits() {
    let scratch = scratch();
    let mut manager = session_manager(&scratch);

    let spec = ResourceSpec {
        cpu_weight: Some(CpuWeight::saturating(50)),
        memory_max: Some(1 << 30),
        tasks_max: Some(100),
        ..Default::default()
    };
    handle_event(
        &mut manager,
        Event::AddUnit {
            name: "session-1.scope".into(),
            kind: UnitKind::Scope,
            slice: Some("user.slice".into()),
            resources: Some(spec),
        },
    );
    dispatch_queues(&mut manager);

    let attribute = |name: &str| scratch.read(&format!("{SESSION}/{name}"));
    assert_eq!(attribute("cpu.weight"), "50");
    assert_eq!(attribute("cpu.max"), "max 100000");
    assert_eq!(attribute("memory.low"), "0");
    assert_eq!(attribute("memory.max"), "1073741824");
    assert_eq!(attribute("memory.swap.max"), "max");
    assert_eq!(attribute("pids.max"), "100");

    // Controllers are enabled one write at a time; pids comes last.
    assert_eq!(scratch.read("/cgroup.subtree_control"), "+pids");
    assert_eq!(scratch.read("/user.slice/cgroup.subtree_control"), "+pids");
}

#[test]
fn unified_session_must_be_collected_once_empty() {
    let scratch = scratch();
    let mut manager = session_manager(&scratch);
    let session = manager
        .add_unit(
            "session-1.scope",
            UnitKind::Scope,
            Some("user.slice"),
            Some(ResourceSpec { tasks_max: Some(5), ..Default::default() }),
        )
        .expect("session");
    manager.realize(session).expect("realize");

    scratch.write(&format!("{SESSION}/cgroup.events"), "populated 1\n");
    assert!(!manager.notify_empty(SESSION));

    scratch.write(&format!("{SESSION}/cgroup.events"), "populated 0\n");
    handle_event(&mut manager, Event::CgroupEmpty(SESSION.into()));
    dispatch_queues(&mut manager);

    let unit = manager.units().get(session).expect("session");
    assert_eq!(unit.active_state, ActiveState::Inactive);
}
