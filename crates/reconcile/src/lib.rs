//! meshgate reconcile: turns policy plus a match verdict into one lifecycle
//! action and performs it through a [`ClusterClient`].

#![forbid(unsafe_code)]

pub mod client;
pub mod decide;
pub mod policy;
pub mod reconciler;

pub use client::{ClusterClient, Operation, SpecBuilder};
pub use decide::decide;
pub use policy::{collapse, PolicyConfig};
pub use reconciler::{Outcome, ReconcileError, Reconciler};

pub use meshgate_core::{Action, DesiredState};
pub use meshgate_objectmatch::{MatchVerdict, Matcher};
