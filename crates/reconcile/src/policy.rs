//! Policy switches and their collapse into a [`DesiredState`].

use serde::{Deserialize, Serialize};

use meshgate_core::DesiredState;

/// The boolean switches read once per reconcile call.
///
/// `enabled` gates the main resource and may fold in switches above the
/// component (e.g. a global gateways switch). `component_enabled` is the
/// component's own switch only; the multi-mesh companion follows it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyConfig {
    pub enabled: bool,
    pub component_enabled: bool,
    pub create_only: bool,
    pub multi_mesh_enabled: bool,
}

impl PolicyConfig {
    pub fn desired_state(&self) -> DesiredState {
        collapse(self.enabled, self.create_only)
    }

    /// State of the multi-mesh companion resource: the component's own
    /// switch plus multi-mesh, regardless of `enabled`.
    pub fn multi_mesh_desired_state(&self) -> DesiredState {
        collapse(self.component_enabled && self.multi_mesh_enabled, self.create_only)
    }
}

/// `enabled && !create_only` is `Present`, `enabled && create_only` is
/// `Exists`, anything disabled is `Absent` (create-only is irrelevant then).
pub fn collapse(enabled: bool, create_only: bool) -> DesiredState {
    match (enabled, create_only) {
        (true, false) => DesiredState::Present,
        (true, true) => DesiredState::Exists,
        (false, _) => DesiredState::Absent,
    }
}
