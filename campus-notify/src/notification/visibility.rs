//! Role-based visibility rules.
//!
//! Pure functions: no I/O, no hidden state. Roles that are not administrative
//! (including [`Role::Unknown`]) only ever see envelopes addressed to them.

use std::collections::BTreeSet;

use crate::domain::{NotificationEnvelope, Role, TargetScope, Viewer};

use super::events::{CategoryGroup, categories};

/// Broadcast groups a role may read.
fn groups_for(role: Role) -> &'static [CategoryGroup] {
    match role {
        Role::SuperAdmin => &[CategoryGroup::TeacherDirected, CategoryGroup::System],
        Role::Teacher => &[CategoryGroup::StudentDirected, CategoryGroup::System],
        Role::Admin => &[CategoryGroup::System, CategoryGroup::AccountReview],
        Role::Standard | Role::Student | Role::Unknown => &[],
    }
}

/// Broadcast categories visible to `role`.
pub fn allowed_categories(role: Role) -> BTreeSet<&'static str> {
    let groups = groups_for(role);
    categories()
        .iter()
        .filter(|info| groups.contains(&info.group))
        .map(|info| info.category)
        .collect()
}

/// Broadcast categories visible to any of `viewer`'s roles.
pub fn viewer_categories(viewer: &Viewer) -> BTreeSet<&'static str> {
    viewer
        .roles()
        .iter()
        .flat_map(|role| allowed_categories(*role))
        .collect()
}

/// Whether `viewer` may see `envelope`.
pub fn can_see(envelope: &NotificationEnvelope, viewer: &Viewer) -> bool {
    match &envelope.target {
        TargetScope::Identity(identity) => identity == &viewer.identity,
        TargetScope::Broadcast => viewer_categories(viewer).contains(envelope.category.as_str()),
    }
}

/// Per-viewer visibility check with the allowed set computed once.
#[derive(Debug, Clone)]
pub struct VisibilityFilter {
    viewer: Viewer,
    allowed: BTreeSet<&'static str>,
}

impl VisibilityFilter {
    pub fn new(viewer: &Viewer) -> Self {
        Self {
            viewer: viewer.clone(),
            allowed: viewer_categories(viewer),
        }
    }

    pub fn allowed(&self) -> &BTreeSet<&'static str> {
        &self.allowed
    }

    pub fn allows(&self, envelope: &NotificationEnvelope) -> bool {
        match &envelope.target {
            TargetScope::Identity(identity) => identity == &self.viewer.identity,
            TargetScope::Broadcast => self.allowed.contains(envelope.category.as_str()),
        }
    }
}
