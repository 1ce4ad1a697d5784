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

use sessiond::cgroups::{FsBackend, Hierarchy, ResourceSpec};
use sessiond::manager::{Manager, StateSnapshot};
use sessiond::units::{UnitId, UnitKind, ROOT_SLICE};
use test_helpers::ScratchCgroupFs;

fn manager(scratch: &ScratchCgroupFs) -> (Manager<FsBackend>, UnitId) {
    let backend = FsBackend::with_hierarchy(scratch.path(), Hierarchy::Legacy);
    let mut manager = Manager::new(backend, "").expect("manager");
    let _ = manager
        .add_unit(ROOT_SLICE, UnitKind::Slice, None, None)
        .expect("root slice");
    let session = manager
        .add_unit(
            "session-9.scope",
            UnitKind::Scope,
            Some(ROOT_SLICE),
            Some(ResourceSpec { tasks_max: Some(10), ..Default::default() }),
        )
        .expect("session");
    (manager, session)
}

#[test]
fn cgroup_state_must_survive_a_restart() {
    let scratch = ScratchCgroupFs::legacy(&["pids"]);
    let state_file = scratch.join("run/sessiond/cgroups.json");

    let (mut before, session) = manager(&scratch);
    before.realize(session).expect("realize");
    before.snapshot().save(&state_file).expect("save");
    drop(before);

    let (mut after, session) = manager(&scratch);
    let snapshot = StateSnapshot::load(&state_file).expect("load").expect("saved");
    assert_eq!(after.restore(&snapshot), 2);

    assert!(after.has_mask_realized(session));
    assert_eq!(
        after.units().get(session).expect("session").cgroup.path.as_deref(),
        Some("/session-9.scope")
    );
}
