//! In-memory [`Gateway`] double. Models deployments and node state as
//! plain maps so tests can assert on exact call sequences and simulate slow convergence without
//! a real cluster.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cancel::{self, CancellationToken};
use crate::config::WaitOptions;
use crate::error::{Error, Result};
use crate::gateway::{DeploymentInfo, Gateway};

#[derive(Debug, Clone)]
struct FakeDeployment {
    desired: u32,
    observed: u32,
    node_pinned: bool,
    /// Number of `wait_for_deployment_scale` polls before `observed` snaps to `desired`. `0`
    /// means it converges on the first poll.
    convergence_delay: u32,
    /// When `true`, the next `scale_deployment` call against this deployment returns
    /// `Error::Conflict` instead of applying, then resets to `false`.
    conflict_next_scale: bool,
}

/// Construction parameters for seeding [`FakeGateway`].
#[derive(Debug, Clone)]
pub struct SeedDeployment {
    pub namespace: String,
    pub name: String,
    pub replicas: u32,
    pub node_pinned: bool,
}

struct State {
    deployments: BTreeMap<(String, String), FakeDeployment>,
    cordoned: bool,
    noout_set: bool,
    node_known: bool,
    tools_pod_ready: bool,
    /// Remaining polls before `wait_for_monitor_quorum` reports healthy.
    quorum_delay: u32,
    cluster_reachable: bool,
}

/// An in-memory cluster double implementing [`Gateway`]. Not `Clone`-able by design: tests hold
/// one instance and assert on it after running an orchestrator against `&self`.
pub struct FakeGateway {
    state: Mutex<State>,
}

impl FakeGateway {
    pub fn new() -> Self {
        FakeGateway {
            state: Mutex::new(State {
                deployments: BTreeMap::new(),
                cordoned: false,
                noout_set: false,
                node_known: true,
                tools_pod_ready: true,
                quorum_delay: 0,
                cluster_reachable: true,
            }),
        }
    }

    pub fn seed(&self, deployments: impl IntoIterator<Item = SeedDeployment>) {
        let mut state = self.state.lock().unwrap();
        for d in deployments {
            state.deployments.insert(
                (d.namespace, d.name),
                FakeDeployment {
                    desired: d.replicas,
                    observed: d.replicas,
                    node_pinned: d.node_pinned,
                    convergence_delay: 0,
                    conflict_next_scale: false,
                },
            );
        }
    }

    pub fn set_convergence_delay(&self, namespace: &str, name: &str, polls: u32) {
        let mut state = self.state.lock().unwrap();
        if let Some(d) = state
            .deployments
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            d.convergence_delay = polls;
        }
    }

    /// Makes the next `scale_deployment` call against `namespace/name` fail with
    /// `Error::Conflict`, simulating a concurrent mutation. One-shot: cleared after it fires.
    pub fn set_force_conflict(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(d) = state
            .deployments
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            d.conflict_next_scale = true;
        }
    }

    pub fn set_quorum_delay(&self, polls: u32) {
        self.state.lock().unwrap().quorum_delay = polls;
    }

    pub fn set_node_known(&self, known: bool) {
        self.state.lock().unwrap().node_known = known;
    }

    pub fn set_tools_pod_ready(&self, ready: bool) {
        self.state.lock().unwrap().tools_pod_ready = ready;
    }

    pub fn set_cluster_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().cluster_reachable = reachable;
    }

    pub fn is_cordoned(&self) -> bool {
        self.state.lock().unwrap().cordoned
    }

    pub fn is_noout_set(&self) -> bool {
        self.state.lock().unwrap().noout_set
    }

    pub fn desired_replicas(&self, namespace: &str, name: &str) -> Option<u32> {
        self.state
            .lock()
            .unwrap()
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .map(|d| d.desired)
    }

    pub fn remove_deployment(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .deployments
            .remove(&(namespace.to_string(), name.to_string()));
    }
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn list_node_pinned_deployments(
        &self,
        namespace: &str,
        _node: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<DeploymentInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .deployments
            .iter()
            .filter(|((ns, _), d)| ns == namespace && d.node_pinned)
            .map(|((ns, name), d)| DeploymentInfo {
                namespace: ns.clone(),
                name: name.clone(),
                desired_replicas: d.desired,
                observed_replicas: d.observed,
            })
            .collect())
    }

    async fn list_scaled_down_deployments_for_node(
        &self,
        namespace: &str,
        node: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<DeploymentInfo>> {
        let all = self
            .list_node_pinned_deployments(namespace, node, cancel)
            .await?;
        Ok(all.into_iter().filter(|d| d.desired_replicas == 0).collect())
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<DeploymentInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .map(|d| DeploymentInfo {
                namespace: namespace.to_string(),
                name: name.to_string(),
                desired_replicas: d.desired,
                observed_replicas: d.observed,
            }))
    }

    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        let Some(d) = state.deployments.get_mut(&key) else {
            return Err(Error::NotFound(format!("{namespace}/{name}")));
        };
        if d.conflict_next_scale {
            d.conflict_next_scale = false;
            return Err(Error::Conflict(format!("{namespace}/{name}")));
        }
        d.desired = replicas;
        Ok(())
    }

    async fn wait_for_deployment_scale(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
        opts: WaitOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + opts.timeout;
        loop {
            cancel::check(cancel, "wait-for-deployment-scale")?;
            {
                let mut state = self.state.lock().unwrap();
                let key = (namespace.to_string(), name.to_string());
                match state.deployments.get_mut(&key) {
                    None => return Err(Error::NotFound(format!("{namespace}/{name}"))),
                    Some(d) => {
                        if d.convergence_delay == 0 {
                            d.observed = d.desired;
                        } else {
                            d.convergence_delay -= 1;
                        }
                        if d.observed == replicas {
                            return Ok(());
                        }
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(opts.timeout, format!("{namespace}/{name}")));
            }
            cancel::sleep_cancellable(cancel, opts.poll_interval, "wait-for-deployment-scale")
                .await?;
        }
    }

    async fn node_exists(&self, _node: &str, _cancel: &CancellationToken) -> Result<bool> {
        Ok(self.state.lock().unwrap().node_known)
    }

    async fn cordon_node(&self, _node: &str, _cancel: &CancellationToken) -> Result<()> {
        self.state.lock().unwrap().cordoned = true;
        Ok(())
    }

    async fn uncordon_node(&self, _node: &str, _cancel: &CancellationToken) -> Result<()> {
        self.state.lock().unwrap().cordoned = false;
        Ok(())
    }

    async fn tools_pod_ready(&self, _namespace: &str, _cancel: &CancellationToken) -> Result<bool> {
        Ok(self.state.lock().unwrap().tools_pod_ready)
    }

    async fn set_noout(&self, _namespace: &str, _cancel: &CancellationToken) -> Result<()> {
        self.state.lock().unwrap().noout_set = true;
        Ok(())
    }

    async fn unset_noout(&self, _namespace: &str, _cancel: &CancellationToken) -> Result<()> {
        self.state.lock().unwrap().noout_set = false;
        Ok(())
    }

    async fn wait_for_monitor_quorum(
        &self,
        namespace: &str,
        opts: WaitOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + opts.timeout;
        loop {
            cancel::check(cancel, "wait-for-monitor-quorum")?;
            {
                let mut state = self.state.lock().unwrap();
                if state.quorum_delay == 0 {
                    return Ok(());
                }
                state.quorum_delay -= 1;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(opts.timeout, format!("monitor quorum in {namespace}")));
            }
            cancel::sleep_cancellable(cancel, opts.poll_interval, "wait-for-monitor-quorum").await?;
        }
    }
}
