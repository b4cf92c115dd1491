//! Session - source of truth for instances, groups, and membership
//!
//! Mutation is serialized through a single write lock; reads clone Arcs out
//! under the shared lock and never hold it across awaits. Unknown-ID lookups
//! warn and no-op rather than panic.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use eyre::{Result, eyre};
use tracing::warn;

use crate::domain::{GroupPhase, InstanceGroup, InstanceStatus};
use crate::instance::{Instance, InstanceSupervisor};

struct SessionInner {
    /// Ordered by creation
    instances: Vec<Arc<Instance>>,
    supervisors: HashMap<String, Arc<InstanceSupervisor>>,
    /// Top-level and nested groups, ordered by creation
    groups: Vec<InstanceGroup>,
}

/// Aggregate of instances and groups
pub struct Session {
    inner: RwLock<SessionInner>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SessionInner {
                instances: Vec::new(),
                supervisors: HashMap::new(),
                groups: Vec::new(),
            }),
        }
    }

    // === Instances ===

    pub fn insert_instance(&self, instance: Arc<Instance>, supervisor: Arc<InstanceSupervisor>) {
        let mut inner = self.inner.write().expect("session lock poisoned");
        inner.supervisors.insert(instance.id.clone(), supervisor);
        inner.instances.push(instance);
    }

    pub fn instance(&self, id: &str) -> Option<Arc<Instance>> {
        self.inner
            .read()
            .expect("session lock poisoned")
            .instances
            .iter()
            .find(|i| i.id == id)
            .cloned()
    }

    pub fn supervisor(&self, id: &str) -> Option<Arc<InstanceSupervisor>> {
        self.inner
            .read()
            .expect("session lock poisoned")
            .supervisors
            .get(id)
            .cloned()
    }

    /// All instances in creation order
    pub fn instances(&self) -> Vec<Arc<Instance>> {
        self.inner.read().expect("session lock poisoned").instances.clone()
    }

    /// Supervisors of instances that are not terminal
    pub fn live_supervisors(&self) -> Vec<Arc<InstanceSupervisor>> {
        let inner = self.inner.read().expect("session lock poisoned");
        inner
            .instances
            .iter()
            .filter(|i| i.status().is_live())
            .filter_map(|i| inner.supervisors.get(&i.id).cloned())
            .collect()
    }

    /// Remove an instance and scrub it from group member lists
    pub fn remove_instance(&self, id: &str) -> Option<(Arc<Instance>, Arc<InstanceSupervisor>)> {
        let mut inner = self.inner.write().expect("session lock poisoned");
        let pos = inner.instances.iter().position(|i| i.id == id)?;
        let instance = inner.instances.remove(pos);
        let supervisor = inner.supervisors.remove(id)?;
        for group in &mut inner.groups {
            group.remove_member(id);
        }
        Some((instance, supervisor))
    }

    /// Pending dependents whose parent completed, ready to auto-start
    ///
    /// Clears each returned instance's `waits_for` so it is released once.
    pub fn take_ready_dependents(&self) -> Vec<Arc<InstanceSupervisor>> {
        let inner = self.inner.read().expect("session lock poisoned");
        let mut ready = Vec::new();
        for instance in &inner.instances {
            if instance.status() != InstanceStatus::Pending || instance.workdir().is_none() {
                continue;
            }
            let Some(parent_id) = instance.waits_for() else {
                continue;
            };
            let parent_done = inner
                .instances
                .iter()
                .find(|i| i.id == parent_id)
                .map(|p| p.status() == InstanceStatus::Completed)
                .unwrap_or_else(|| {
                    // Dismissed parent releases the child
                    true
                });
            if parent_done && let Some(sup) = inner.supervisors.get(&instance.id) {
                instance.set_waits_for(None);
                ready.push(sup.clone());
            }
        }
        ready
    }

    // === Groups ===

    /// Add a group; names must be unique within the same parent
    pub fn add_group(&self, group: InstanceGroup) -> Result<String> {
        let mut inner = self.inner.write().expect("session lock poisoned");
        if let Some(parent_id) = &group.parent {
            if !inner.groups.iter().any(|g| &g.id == parent_id) {
                return Err(eyre!("parent group {parent_id} does not exist"));
            }
        }
        let clash = inner
            .groups
            .iter()
            .any(|g| g.parent == group.parent && g.name == group.name);
        if clash {
            return Err(eyre!("group name '{}' already used in this parent", group.name));
        }
        let id = group.id.clone();
        inner.groups.push(group);
        Ok(id)
    }

    pub fn group(&self, id: &str) -> Option<InstanceGroup> {
        self.inner
            .read()
            .expect("session lock poisoned")
            .groups
            .iter()
            .find(|g| g.id == id)
            .cloned()
    }

    /// Top-level groups in creation order
    pub fn top_level_groups(&self) -> Vec<InstanceGroup> {
        self.inner
            .read()
            .expect("session lock poisoned")
            .groups
            .iter()
            .filter(|g| g.parent.is_none())
            .cloned()
            .collect()
    }

    pub fn set_group_phase(&self, id: &str, phase: GroupPhase) {
        let mut inner = self.inner.write().expect("session lock poisoned");
        match inner.groups.iter_mut().find(|g| g.id == id) {
            Some(group) => group.phase = phase,
            None => warn!(group_id = %id, "set_group_phase on unknown group"),
        }
    }

    /// Record membership; the instance must exist in this session
    pub fn add_group_member(&self, group_id: &str, instance_id: &str) {
        let mut inner = self.inner.write().expect("session lock poisoned");
        let instance = inner.instances.iter().find(|i| i.id == instance_id).cloned();
        let Some(instance) = instance else {
            warn!(group_id, instance_id, "add_group_member: unknown instance");
            return;
        };
        match inner.groups.iter_mut().find(|g| g.id == group_id) {
            Some(group) => {
                group.add_member(instance_id);
                instance.set_group(Some(group_id.to_string()));
            }
            None => warn!(group_id, instance_id, "add_group_member: unknown group"),
        }
    }

    /// Instances belonging to a group, in member order
    pub fn group_instances(&self, group_id: &str) -> Vec<Arc<Instance>> {
        let inner = self.inner.read().expect("session lock poisoned");
        let Some(group) = inner.groups.iter().find(|g| g.id == group_id) else {
            return Vec::new();
        };
        group
            .members
            .iter()
            .filter_map(|id| inner.instances.iter().find(|i| &i.id == id).cloned())
            .collect()
    }

    /// Remove a group and any children referencing it as parent
    pub fn remove_group(&self, id: &str) {
        let mut inner = self.inner.write().expect("session lock poisoned");
        inner.groups.retain(|g| g.id != id && g.parent.as_deref() != Some(id));
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ScriptedLauncher;
    use crate::domain::GroupKind;
    use crate::events::EventBus;
    use crate::instance::TimeoutConfig;

    fn make_instance(session: &Session, task: &str) -> Arc<Instance> {
        let bus = EventBus::with_default_capacity();
        let launcher = Arc::new(ScriptedLauncher::new());
        let instance = Arc::new(Instance::new(task, 4096, TimeoutConfig::default()));
        let sup = Arc::new(InstanceSupervisor::new(
            instance.clone(),
            launcher,
            bus.emitter_for(instance.id.clone()),
        ));
        session.insert_instance(instance.clone(), sup);
        instance
    }

    #[test]
    fn test_insert_and_lookup() {
        let session = Session::new();
        let inst = make_instance(&session, "task a");
        assert!(session.instance(&inst.id).is_some());
        assert!(session.supervisor(&inst.id).is_some());
        assert!(session.instance("missing").is_none());
    }

    #[test]
    fn test_instances_ordered_by_creation() {
        let session = Session::new();
        let a = make_instance(&session, "first");
        let b = make_instance(&session, "second");
        let ids: Vec<String> = session.instances().iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec![a.id.clone(), b.id.clone()]);
    }

    #[test]
    fn test_remove_instance_scrubs_groups() {
        let session = Session::new();
        let inst = make_instance(&session, "task");
        let group_id = session
            .add_group(InstanceGroup::new("g", GroupKind::Plain))
            .unwrap();
        session.add_group_member(&group_id, &inst.id);
        assert_eq!(session.group(&group_id).unwrap().members.len(), 1);

        session.remove_instance(&inst.id);
        assert!(session.group(&group_id).unwrap().members.is_empty());
        assert!(session.instance(&inst.id).is_none());
    }

    #[test]
    fn test_group_name_unique_within_parent() {
        let session = Session::new();
        session.add_group(InstanceGroup::new("dup", GroupKind::Plain)).unwrap();
        assert!(session.add_group(InstanceGroup::new("dup", GroupKind::Plain)).is_err());

        // Same name under a different parent is fine
        let parent_id = session
            .add_group(InstanceGroup::new("parent", GroupKind::UltraPlan))
            .unwrap();
        session
            .add_group(InstanceGroup::new("dup", GroupKind::Plain).with_parent(&parent_id))
            .unwrap();
    }

    #[test]
    fn test_add_group_with_missing_parent_fails() {
        let session = Session::new();
        let group = InstanceGroup::new("child", GroupKind::Plain).with_parent("ghost");
        assert!(session.add_group(group).is_err());
    }

    #[test]
    fn test_add_member_unknown_instance_is_noop() {
        let session = Session::new();
        let group_id = session
            .add_group(InstanceGroup::new("g", GroupKind::Plain))
            .unwrap();
        session.add_group_member(&group_id, "ghost-instance");
        assert!(session.group(&group_id).unwrap().members.is_empty());
    }

    #[test]
    fn test_membership_sets_back_reference() {
        let session = Session::new();
        let inst = make_instance(&session, "task");
        let group_id = session
            .add_group(InstanceGroup::new("g", GroupKind::Ralph))
            .unwrap();
        session.add_group_member(&group_id, &inst.id);
        assert_eq!(inst.group(), Some(group_id.clone()));
        assert_eq!(session.group_instances(&group_id).len(), 1);
    }

    #[test]
    fn test_take_ready_dependents() {
        let session = Session::new();
        let parent = make_instance(&session, "parent");
        let child = make_instance(&session, "child");
        child.set_waits_for(Some(parent.id.clone()));
        child.set_workdir(std::env::temp_dir());

        // Parent still pending: child not released
        assert!(session.take_ready_dependents().is_empty());

        parent.try_transition(InstanceStatus::Working);
        parent.try_transition(InstanceStatus::Completed);
        let ready = session.take_ready_dependents();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id(), child.id);

        // Released exactly once
        assert!(session.take_ready_dependents().is_empty());
    }

    #[test]
    fn test_live_supervisors_excludes_terminal() {
        let session = Session::new();
        let a = make_instance(&session, "a");
        let _b = make_instance(&session, "b");
        a.try_transition(InstanceStatus::Working);
        a.try_transition(InstanceStatus::Completed);
        assert_eq!(session.live_supervisors().len(), 1);
    }

    #[test]
    fn test_remove_group_removes_children() {
        let session = Session::new();
        let parent_id = session
            .add_group(InstanceGroup::new("parent", GroupKind::UltraPlan))
            .unwrap();
        session
            .add_group(InstanceGroup::new("child", GroupKind::Plain).with_parent(&parent_id))
            .unwrap();
        session.remove_group(&parent_id);
        assert!(session.top_level_groups().is_empty());
        assert!(session.group(&parent_id).is_none());
    }
}
