//! meshgate egress – the egress gateway component: a `MeshGateway` plus an
//! optional multi-mesh `Gateway`, reconciled in that order.

#![forbid(unsafe_code)]

pub mod builders;
pub mod config;

use anyhow::{Context, Result};
use tracing::{debug, info};

use meshgate_objectmatch::{DefaultsTable, Matcher};
use meshgate_reconcile::{ClusterClient, Outcome, Reconciler, SpecBuilder};

pub use builders::{EgressGatewayBuilder, MultiMeshGatewayBuilder, MULTIMESH_RESOURCE_NAME, RESOURCE_NAME};
pub use config::{EgressConfig, GatewaysConfig, MeshConfig};

pub const COMPONENT: &str = "egressgateway";

/// The mesh object that only carries shared configuration; it owns the
/// gateway but never the multi-mesh companion.
const CONFIG_ONLY_MESH: &str = "istio-config";

/// Matcher with the component's server defaults plus any `extra` ones.
pub fn matcher_with_defaults(extra: DefaultsTable) -> Matcher {
    let mut defaults = builders::default_rules();
    defaults.extend(extra);
    Matcher::default().with_defaults(defaults)
}

pub struct EgressGateway<C> {
    reconciler: Reconciler<C>,
}

impl<C: ClusterClient> EgressGateway<C> {
    pub fn new(client: C) -> Self {
        Self::with_defaults(client, DefaultsTable::new())
    }

    pub fn with_defaults(client: C, extra: DefaultsTable) -> Self {
        Self { reconciler: Reconciler::new(client, matcher_with_defaults(extra)) }
    }

    pub fn reconciler(&self) -> &Reconciler<C> {
        &self.reconciler
    }

    /// Bring the component's resources in line with `config`. Stops at the
    /// first failure; resources already handled stay as they are.
    pub async fn reconcile(&self, config: &MeshConfig) -> Result<Vec<Outcome>> {
        self.run(config, false).await
    }

    /// Report what [`EgressGateway::reconcile`] would do.
    pub async fn plan(&self, config: &MeshConfig) -> Result<Vec<Outcome>> {
        self.run(config, true).await
    }

    async fn run(&self, config: &MeshConfig, dry_run: bool) -> Result<Vec<Outcome>> {
        info!(component = COMPONENT, mesh = %config.name, dry_run, "Reconciling");
        let mut outcomes = Vec::with_capacity(2);

        outcomes.push(self.step("resource", &EgressGatewayBuilder, config, dry_run).await?);
        if config.name == CONFIG_ONLY_MESH {
            debug!(component = COMPONENT, "skipping multi-mesh gateway for config-only mesh");
            info!(component = COMPONENT, "Reconciled");
            return Ok(outcomes);
        }
        outcomes.push(self.step("dynamic resource", &MultiMeshGatewayBuilder, config, dry_run).await?);

        info!(component = COMPONENT, "Reconciled");
        Ok(outcomes)
    }

    /// `what` names the resource class in error context.
    async fn step<B>(&self, what: &str, builder: &B, config: &MeshConfig, dry_run: bool) -> Result<Outcome>
    where
        B: SpecBuilder<Config = MeshConfig>,
    {
        let res = if dry_run {
            self.reconciler.plan_with(builder, config).await
        } else {
            self.reconciler.reconcile_with(builder, config).await
        };
        let outcome = res.with_context(|| format!("failed to reconcile {} {} {}", what, builder.kind(), builder.name()))?;
        info!(
            component = COMPONENT,
            gvk = %outcome.kind,
            key = %outcome.key,
            state = %outcome.state,
            action = %outcome.action,
            diffs = outcome.diff_paths.len(),
            "resource reconciled"
        );
        Ok(outcome)
    }
}
