use crate::error::{PalettizerError, Result};
use crate::model::{GroupId, GroupSet, PageId, PlacementId, TextureId, TextureProperties};
use crate::placement::Placement;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Name of the group that never receives textures during cover assignment.
pub const NULL_GROUP: &str = "null";

/// A deployment target: textures assigned here are packed into this group's
/// palette images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub dirname: String,
    #[serde(default)]
    pub margin_override: Option<u32>,
    /// Groups this one depends on.
    #[serde(default)]
    pub depends_on: GroupSet,
    #[serde(default)]
    pub dependency_level: u32,
    #[serde(default)]
    pub dependency_order: u32,
    #[serde(default)]
    pub dirname_order: u32,

    /// Groups that depend on this one (reverse edges of `depends_on`).
    #[serde(skip)]
    pub(crate) dependents: GroupSet,
    #[serde(skip)]
    pub(crate) placements: BTreeSet<PlacementId>,
    #[serde(skip)]
    pub(crate) pages: BTreeMap<TextureProperties, PageId>,
}

impl Group {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dirname: name.to_string(),
            margin_override: None,
            depends_on: GroupSet::new(),
            dependency_level: 0,
            dependency_order: 0,
            dirname_order: 0,
            dependents: GroupSet::new(),
            placements: BTreeSet::new(),
            pages: BTreeMap::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.name == NULL_GROUP
    }

    pub fn placements(&self) -> impl Iterator<Item = PlacementId> + '_ {
        self.placements.iter().copied()
    }

    pub fn pages(&self) -> impl Iterator<Item = (&TextureProperties, PageId)> + '_ {
        self.pages.iter().map(|(k, v)| (k, *v))
    }
}

impl Session {
    /// Returns the group called `name`, creating it if needed.
    pub fn make_group(&mut self, name: &str) -> GroupId {
        if let Some(id) = self.group_names.get(name) {
            return *id;
        }
        let id = self.groups.insert(Group::new(name));
        self.group_names.insert(name.to_string(), id);
        id
    }

    pub fn group_by_name(&self, name: &str) -> Option<GroupId> {
        self.group_names.get(name).copied()
    }

    /// Records that `group` depends on `other`.
    ///
    /// Fails with [`PalettizerError::DependencyCycle`] if `other` already
    /// (transitively) depends on `group`.
    pub fn group_with(&mut self, group: GroupId, other: GroupId) -> Result<()> {
        if self.complete_groups(other).contains(&group) {
            return Err(PalettizerError::DependencyCycle {
                group: self.groups[group].name.clone(),
                dependency: self.groups[other].name.clone(),
            });
        }
        self.groups[group].depends_on.insert(other);
        self.groups[other].dependents.insert(group);
        Ok(())
    }

    /// `group` plus every group it transitively depends on.
    pub fn complete_groups(&self, group: GroupId) -> GroupSet {
        let mut out = GroupSet::new();
        let mut stack = vec![group];
        while let Some(g) = stack.pop() {
            if out.insert(g) {
                stack.extend(self.groups[g].depends_on.iter().copied());
            }
        }
        out
    }

    /// Closure of [`Session::complete_groups`] over a whole set.
    pub fn complete_group_set(&self, groups: &GroupSet) -> GroupSet {
        let mut out = GroupSet::new();
        for &g in groups {
            out.extend(self.complete_groups(g));
        }
        out
    }

    pub fn reset_dependency_levels(&mut self) {
        for (_, g) in self.groups.iter_mut() {
            g.dependency_level = 0;
        }
    }

    /// Raises `group` to at least `level`, pushing `level + 1` on to every
    /// group that depends on it. Stops wherever the recorded level is already
    /// high enough.
    pub fn set_dependency_level(&mut self, group: GroupId, level: u32) {
        let mut stack = vec![(group, level)];
        while let Some((g, lvl)) = stack.pop() {
            let grp = &mut self.groups[g];
            if lvl <= grp.dependency_level {
                continue;
            }
            grp.dependency_level = lvl;
            stack.extend(grp.dependents.iter().map(|&d| (d, lvl + 1)));
        }
    }

    /// One ordering pass over `group`'s dependencies. Returns whether anything changed.
    fn raise_dependency_order(&mut self, group: GroupId) -> bool {
        let deps: Vec<(u32, u32, bool)> = {
            let grp = &self.groups[group];
            grp.depends_on
                .iter()
                .map(|&d| {
                    let dep = &self.groups[d];
                    (dep.dependency_order, dep.dirname_order, dep.dirname == grp.dirname)
                })
                .collect()
        };
        let grp = &mut self.groups[group];
        let before = (grp.dependency_order, grp.dirname_order);
        for (order, dirname_order, same_dirname) in deps {
            grp.dependency_order = grp.dependency_order.max(order + 1);
            grp.dirname_order = if same_dirname {
                grp.dirname_order.max(dirname_order)
            } else {
                grp.dirname_order.max(dirname_order + 1)
            };
        }
        before != (grp.dependency_order, grp.dirname_order)
    }

    /// Propagates `dependency_order` and `dirname_order` until nothing changes.
    pub fn set_dependency_order(&mut self) {
        let ids = self.groups.ids();
        let mut passes = 0;
        loop {
            let mut changed = false;
            for &g in &ids {
                changed |= self.raise_dependency_order(g);
            }
            passes += 1;
            if !changed {
                break;
            }
        }
        debug!(passes, "dependency order settled");
    }

    /// Recomputes levels and orders from scratch for the current edges.
    pub fn update_group_ordering(&mut self) {
        self.reset_dependency_levels();
        for (_, g) in self.groups.iter_mut() {
            g.dependency_order = 0;
            g.dirname_order = 0;
        }
        for g in self.groups.ids() {
            self.set_dependency_level(g, 1);
        }
        self.set_dependency_order();
    }

    /// Whether `a` should receive a texture ahead of `b`.
    ///
    /// `asset_groups` holds the complete group set of each asset that
    /// references the texture in question.
    pub fn is_preferred_over(&self, a: GroupId, b: GroupId, asset_groups: &[GroupSet]) -> bool {
        let (ga, gb) = (&self.groups[a], &self.groups[b]);
        if ga.dirname_order != gb.dirname_order {
            return ga.dirname_order > gb.dirname_order;
        }
        if ga.dependency_order != gb.dependency_order {
            return ga.dependency_order > gb.dependency_order;
        }
        let count = |g: GroupId| asset_groups.iter().filter(|s| s.contains(&g)).count();
        count(a) < count(b)
    }

    /// Creates the placement of `texture` in `group`.
    pub fn prepare(&mut self, group: GroupId, texture: TextureId) -> PlacementId {
        let pid = self.placements.insert(Placement::new(texture, group));
        self.groups[group].placements.insert(pid);
        let tex = &mut self.textures[texture];
        tex.placements.insert(group, pid);
        tex.actual_groups.insert(group);
        debug!(texture = %tex.name, group = %self.groups[group].name, "prepared placement");
        pid
    }

    /// Destroys a placement, leaving a cleared region where it was packed.
    pub fn unplace(&mut self, placement: PlacementId) {
        self.force_replace(placement);
        let Some(p) = self.placements.remove(placement) else {
            return;
        };
        self.groups[p.group].placements.remove(&placement);
        if let Some(tex) = self.textures.get_mut(p.texture) {
            tex.placements.remove(&p.group);
            tex.actual_groups.remove(&p.group);
        }
        for aid in p.references {
            if let Some(asset) = self.assets.get_mut(aid) {
                asset.stale = true;
                for r in asset.references.iter_mut() {
                    if r.placement == Some(placement) {
                        r.placement = None;
                    }
                }
            }
        }
    }

    /// Forces every placement of `group` back to `Working` so it is repacked.
    pub fn reset_group(&mut self, group: GroupId) {
        let pages: Vec<PageId> = self.groups[group].pages.values().copied().collect();
        for page in pages {
            self.reset_page(page);
        }
        let placements: Vec<PlacementId> = self.groups[group].placements.iter().copied().collect();
        for pid in placements {
            self.force_replace(pid);
        }
    }
}
