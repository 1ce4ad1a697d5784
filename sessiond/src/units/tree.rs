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
use super::{Result, Unit, UnitId, UnitKind, UnitName, UnitsError};
use crate::cgroups::ResourceSpec;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Arena of units. Parent links are handles into the arena, and the member
/// index is kept in step with them.
#[derive(Debug, Default)]
pub struct UnitTree {
    units: BTreeMap<UnitId, Unit>,
    names: HashMap<UnitName, UnitId>,
    members: BTreeMap<UnitId, BTreeSet<UnitId>>,
    next_id: u64,
}

impl UnitTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a unit, optionally inside `slice`. Kinds without cgroup support
    /// drop `resources`; others get a default configuration when none is
    /// given.
    pub fn insert(
        &mut self,
        name: UnitName,
        kind: UnitKind,
        slice: Option<UnitId>,
        resources: Option<ResourceSpec>,
    ) -> Result<UnitId> {
        if self.names.contains_key(&name) {
            return Err(UnitsError::DuplicateName { name });
        }
        if let Some(slice) = slice {
            self.check_slice(slice)?;
        }

        let id = UnitId(self.next_id);
        self.next_id += 1;

        let _ = self.names.insert(name.clone(), id);
        let _ = self.units.insert(id, Unit::new(id, name, kind, slice, resources));
        if let Some(slice) = slice {
            let _ = self.members.entry(slice).or_default().insert(id);
        }
        Ok(id)
    }

    /// Removes a unit. Slices must be emptied first.
    pub fn remove(&mut self, id: UnitId) -> Result<Unit> {
        let unit = self.get(id).ok_or(UnitsError::NotFound { id })?;
        if self.members.get(&id).map_or(false, |m| !m.is_empty()) {
            return Err(UnitsError::HasMembers { name: unit.name().clone() });
        }

        let unit = self.units.remove(&id).ok_or(UnitsError::NotFound { id })?;
        let _ = self.names.remove(unit.name());
        let _ = self.members.remove(&id);
        if let Some(slice) = unit.slice {
            if let Some(members) = self.members.get_mut(&slice) {
                let _ = members.remove(&id);
            }
        }
        Ok(unit)
    }

    pub fn get(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(&id)
    }

    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        self.units.get_mut(&id)
    }

    pub fn lookup(&self, name: &str) -> Option<UnitId> {
        self.names.get(name).copied()
    }

    pub fn contains(&self, id: UnitId) -> bool {
        self.units.contains_key(&id)
    }

    pub fn parent(&self, id: UnitId) -> Option<UnitId> {
        self.get(id).and_then(|u| u.slice)
    }

    /// Units placed directly in `id`.
    pub fn members(&self, id: UnitId) -> Vec<UnitId> {
        self.members
            .get(&id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Slices above `id`, nearest first.
    pub fn ancestors(&self, id: UnitId) -> Vec<UnitId> {
        let mut ancestors = Vec::new();
        let mut current = self.parent(id);
        while let Some(slice) = current {
            // A slice exists before its members, so this only guards the walk.
            if ancestors.contains(&slice) {
                break;
            }
            ancestors.push(slice);
            current = self.parent(slice);
        }
        ancestors
    }

    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn check_slice(&self, slice: UnitId) -> Result<&Unit> {
        let unit = self.get(slice).ok_or(UnitsError::NotFound { id: slice })?;
        if !unit.is_slice() {
            return Err(UnitsError::NotASlice { name: unit.name().clone() });
        }
        Ok(unit)
    }
}
