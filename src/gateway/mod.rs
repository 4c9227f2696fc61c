//! Cluster gateway (C1): the narrow, typed operation set the orchestrators issue against the
//! cluster. Specified as a trait so tests substitute
//! [`fake::FakeGateway`] and production binds [`kube_gateway::KubeGateway`].

pub mod fake;
pub mod kube_gateway;

use async_trait::async_trait;

use crate::cancel::CancellationToken;
use crate::config::WaitOptions;
use crate::error::Result;

/// A deployment as observed by the gateway: its desired (spec) replica count and its observed
/// (status) replica count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentInfo {
    pub namespace: String,
    pub name: String,
    pub desired_replicas: u32,
    pub observed_replicas: u32,
}

/// The capability set the orchestrators need. Every method takes a cancellation token;
/// waits poll at `opts.poll_interval` and fail with `Error::Timeout` after `opts.timeout`.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Lists deployments in `namespace` whose pod template is pinned to `node` via a node
    /// selector or a required node-affinity clause. Deployments with no pin are excluded.
    async fn list_node_pinned_deployments(
        &self,
        namespace: &str,
        node: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<DeploymentInfo>>;

    /// Same as [`Gateway::list_node_pinned_deployments`], filtered to deployments with desired
    /// replicas = 0.
    async fn list_scaled_down_deployments_for_node(
        &self,
        namespace: &str,
        node: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<DeploymentInfo>>;

    /// Returns `None` when the deployment does not exist (rather than `Error::NotFound`) so
    /// callers that treat absence as a normal outcome (UP's restore-plan building) don't have to
    /// match on an error variant.
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<DeploymentInfo>>;

    /// Sets the desired replica count. Fails with `Error::Conflict` on a concurrent mutation;
    /// convergence itself is observed via a subsequent `wait_for_deployment_scale`.
    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Polls until the deployment's observed replicas equal `replicas` or `opts.timeout` elapses.
    /// Used for both scale-up and scale-down convergence; the contract is identical in both
    /// directions, so one gateway method covers `WaitForDeploymentScaleUp` and
    /// `WaitForDeploymentScaleDown` alike.
    async fn wait_for_deployment_scale(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
        opts: WaitOptions,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// `true` once the node has been observed to exist.
    async fn node_exists(&self, node: &str, cancel: &CancellationToken) -> Result<bool>;

    /// Marks the node unschedulable. Idempotent.
    async fn cordon_node(&self, node: &str, cancel: &CancellationToken) -> Result<()>;

    /// Marks the node schedulable. Idempotent.
    async fn uncordon_node(&self, node: &str, cancel: &CancellationToken) -> Result<()>;

    /// `true` once the configured tools pod has been observed running.
    async fn tools_pod_ready(&self, namespace: &str, cancel: &CancellationToken) -> Result<bool>;

    /// Toggles the cluster-wide flag that suppresses data rebalancing while components are
    /// offline. Idempotent: succeeds immediately if already set.
    async fn set_noout(&self, namespace: &str, cancel: &CancellationToken) -> Result<()>;

    /// Clears the flag set by `set_noout`. Idempotent.
    async fn unset_noout(&self, namespace: &str, cancel: &CancellationToken) -> Result<()>;

    /// Polls the storage cluster until the monitor quorum is reported healthy.
    async fn wait_for_monitor_quorum(
        &self,
        namespace: &str,
        opts: WaitOptions,
        cancel: &CancellationToken,
    ) -> Result<()>;
}
