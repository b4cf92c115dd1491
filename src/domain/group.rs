//! Instance groups
//!
//! A group is a named collection of instance IDs, typically owned by a
//! coordinator. Groups nest one level: a child stores its parent's ID string
//! rather than a handle, so the tree has no cyclic ownership and the parent
//! is looked up through the Session.

use serde::{Deserialize, Serialize};

/// Lifecycle phase of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupPhase {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// Which coordinator (if any) owns the group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupKind {
    /// Plain user-created grouping
    Plain,
    Adversarial,
    Ralph,
    UltraPlan,
}

impl GroupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Adversarial => "adversarial",
            Self::Ralph => "ralph",
            Self::UltraPlan => "ultraplan",
        }
    }
}

/// A named collection of instances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceGroup {
    pub id: String,
    pub name: String,
    /// Parent group ID; single-level nesting only
    pub parent: Option<String>,
    pub kind: GroupKind,
    pub phase: GroupPhase,
    /// Member instance IDs, in insertion order
    pub members: Vec<String>,
}

impl InstanceGroup {
    pub fn new(name: impl Into<String>, kind: GroupKind) -> Self {
        let name = name.into();
        Self {
            id: super::generate_id("group", &name),
            name,
            parent: None,
            kind,
            phase: GroupPhase::Pending,
            members: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent = Some(parent_id.into());
        self
    }

    /// Add a member, ignoring duplicates
    pub fn add_member(&mut self, instance_id: impl Into<String>) {
        let instance_id = instance_id.into();
        if !self.members.contains(&instance_id) {
            self.members.push(instance_id);
        }
    }

    pub fn remove_member(&mut self, instance_id: &str) {
        self.members.retain(|m| m != instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_starts_pending() {
        let group = InstanceGroup::new("review-loop", GroupKind::Adversarial);
        assert_eq!(group.phase, GroupPhase::Pending);
        assert!(group.members.is_empty());
        assert!(group.parent.is_none());
        assert!(group.id.contains("-group-"));
    }

    #[test]
    fn test_add_member_dedupes() {
        let mut group = InstanceGroup::new("g", GroupKind::Plain);
        group.add_member("inst-1");
        group.add_member("inst-2");
        group.add_member("inst-1");
        assert_eq!(group.members, vec!["inst-1", "inst-2"]);
    }

    #[test]
    fn test_remove_member() {
        let mut group = InstanceGroup::new("g", GroupKind::Plain);
        group.add_member("inst-1");
        group.add_member("inst-2");
        group.remove_member("inst-1");
        assert_eq!(group.members, vec!["inst-2"]);
    }

    #[test]
    fn test_with_parent() {
        let parent = InstanceGroup::new("parent", GroupKind::UltraPlan);
        let child = InstanceGroup::new("child", GroupKind::Plain).with_parent(&parent.id);
        assert_eq!(child.parent.as_deref(), Some(parent.id.as_str()));
    }
}
