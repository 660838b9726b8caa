//! One reconcile pass: fetch live, match, decide, write once.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value as Json;

use meshgate_core::{Action, DesiredState, FieldPath, ObjectKey, ObjectKind, ResourceDocument};
use meshgate_objectmatch::{build_merge_patch, MatchError, Matcher};

use crate::client::{ClusterClient, Operation, SpecBuilder};
use crate::decide::decide;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to {op} {kind} {key}")]
    Client {
        op: Operation,
        kind: ObjectKind,
        key: ObjectKey,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to match {kind} {key}")]
    Match {
        kind: ObjectKind,
        key: ObjectKey,
        #[source]
        source: MatchError,
    },
    #[error("failed to build desired {kind} {resource}")]
    Build {
        kind: ObjectKind,
        resource: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ReconcileError {
    /// Client operation that failed, if the failure came from the client.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            ReconcileError::Client { op, .. } => Some(*op),
            _ => None,
        }
    }
}

/// What a pass decided and, unless `dry_run`, did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub kind: ObjectKind,
    pub key: ObjectKey,
    pub state: DesiredState,
    pub action: Action,
    /// Empty unless the matcher ran and found differences.
    pub diff_paths: BTreeSet<FieldPath>,
    /// Merge patch sent (or, for a dry run, that would be sent) on update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Json>,
    pub dry_run: bool,
}

/// Drives one resource at a time.
///
/// Holds no mutable state, so passes for different identities can run
/// concurrently. Passes for the same identity must be serialized by the
/// caller (normally the controller's work queue); nothing here locks.
#[derive(Debug, Clone)]
pub struct Reconciler<C> {
    client: C,
    matcher: Matcher,
}

impl<C: ClusterClient> Reconciler<C> {
    pub fn new(client: C, matcher: Matcher) -> Self {
        Self { client, matcher }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Decide without writing.
    pub async fn plan(&self, desired: &ResourceDocument, state: DesiredState) -> Result<Outcome, ReconcileError> {
        let kind = desired.kind();
        let key = desired.key();
        let live = self
            .client
            .get(kind, key)
            .await
            .map_err(|source| client_error(Operation::Get, desired, source))?;

        // Only Present can lead to an update, so only Present pays for a match.
        let verdict = match (&live, state) {
            (Some(live), DesiredState::Present) => Some(self.matcher.match_documents(live, desired).map_err(|source| {
                ReconcileError::Match { kind: kind.clone(), key: key.clone(), source }
            })?),
            _ => None,
        };
        let action = decide(state, live.is_some(), verdict.as_ref());
        let patch = match (action, &live, &verdict) {
            (Action::Update, Some(live), Some(v)) => Some(build_merge_patch(live, desired, v)),
            (Action::Update, _, _) => Some(desired.to_json()),
            _ => None,
        };
        Ok(Outcome {
            kind: kind.clone(),
            key: key.clone(),
            state,
            action,
            diff_paths: verdict.map(|v| v.into_diff_paths()).unwrap_or_default(),
            patch,
            dry_run: true,
        })
    }

    /// Decide and perform the single write the decision calls for.
    pub async fn reconcile(&self, desired: &ResourceDocument, state: DesiredState) -> Result<Outcome, ReconcileError> {
        let mut outcome = self.plan(desired, state).await?;
        match outcome.action {
            Action::Create => self
                .client
                .create(desired)
                .await
                .map_err(|source| client_error(Operation::Create, desired, source))?,
            Action::Update => {
                let patch = outcome.patch.get_or_insert_with(|| desired.to_json());
                self.client
                    .update(desired, patch)
                    .await
                    .map_err(|source| client_error(Operation::Update, desired, source))?
            }
            Action::Delete => self
                .client
                .delete(desired.kind(), desired.key())
                .await
                .map_err(|source| client_error(Operation::Delete, desired, source))?,
            Action::NoOp => {}
        }
        outcome.dry_run = false;
        Ok(outcome)
    }

    /// Build the desired document and state from `config`, then reconcile.
    pub async fn reconcile_with<B: SpecBuilder>(&self, builder: &B, config: &B::Config) -> Result<Outcome, ReconcileError> {
        let (desired, state) = build(builder, config)?;
        self.reconcile(&desired, state).await
    }

    /// Same as [`Reconciler::reconcile_with`] without the write.
    pub async fn plan_with<B: SpecBuilder>(&self, builder: &B, config: &B::Config) -> Result<Outcome, ReconcileError> {
        let (desired, state) = build(builder, config)?;
        self.plan(&desired, state).await
    }
}

// State is derived before the builder runs and is fixed for the pass.
fn build<B: SpecBuilder>(builder: &B, config: &B::Config) -> Result<(ResourceDocument, DesiredState), ReconcileError> {
    let state = builder.desired_state(config);
    let desired = builder
        .build_desired(config)
        .map_err(|source| ReconcileError::Build { kind: builder.kind(), resource: builder.name().to_string(), source })?;
    Ok((desired, state))
}

fn client_error(op: Operation, desired: &ResourceDocument, source: anyhow::Error) -> ReconcileError {
    ReconcileError::Client { op, kind: desired.kind().clone(), key: desired.key().clone(), source }
}
