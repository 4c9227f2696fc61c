//! Production [`Gateway`] binding over the Kubernetes API.
//!
//! Deployment scale and node cordon state go through the typed `kube::Api<T>` + `Patch::Merge`
//! idiom; the storage-cluster commands (`noout`, monitor quorum) have no Kubernetes resource of
//! their own and are issued by exec-ing into the configured tools pod.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, AttachParams, Patch, PatchParams};
use kube::Client;
use tracing::{info, instrument, warn};

use crate::cancel::{self, CancellationToken};
use crate::config::{Config, WaitOptions};
use crate::error::{Error, Result};
use crate::gateway::{DeploymentInfo, Gateway};

const FIELD_MANAGER: &str = "ceph-node-maintenance";
const NODE_SELECTOR_KEY: &str = "kubernetes.io/hostname";

/// Binds [`Gateway`] to a live cluster via a `kube::Client`.
pub struct KubeGateway {
    client: Client,
    tools_pod_name: String,
    /// Per-call timeout for the typed Kubernetes API (get/patch/list). Distinct from a wait
    /// loop's `WaitOptions.timeout`, which bounds the whole poll, not a single request.
    api_timeout: Duration,
    /// Per-call timeout for commands issued inside the tools pod (`noout`, quorum probes).
    storage_command_timeout: Duration,
}

impl KubeGateway {
    pub fn new(client: Client, tools_pod_name: impl Into<String>) -> Self {
        KubeGateway {
            client,
            tools_pod_name: tools_pod_name.into(),
            api_timeout: Duration::from_secs(30),
            storage_command_timeout: Duration::from_secs(60),
        }
    }

    /// Builds a [`KubeGateway`] whose per-call timeouts come from `cfg` rather than the
    /// built-in defaults.
    pub fn with_config(client: Client, cfg: &Config) -> Self {
        KubeGateway {
            client,
            tools_pod_name: cfg.tools_pod_name.clone(),
            api_timeout: cfg.api_timeout,
            storage_command_timeout: cfg.storage_command_timeout,
        }
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Execs `command` inside the configured tools pod and returns its combined stdout, bounded
    /// by `storage_command_timeout`.
    async fn exec_in_tools_pod(
        &self,
        namespace: &str,
        pod_name: &str,
        command: Vec<&str>,
    ) -> Result<String> {
        let run = async {
            let pods = self.pods(namespace);
            let mut attached = pods
                .exec(pod_name, command, &AttachParams::default().stderr(false))
                .await?;
            let mut stdout = attached.stdout().ok_or_else(|| {
                Error::Precondition("tools pod exec produced no stdout stream".into())
            })?;
            let mut buf = Vec::new();
            tokio::io::AsyncReadExt::read_to_end(&mut stdout, &mut buf)
                .await
                .map_err(|e| Error::io(format!("{namespace}/{pod_name} exec"), e))?;
            attached
                .join()
                .await
                .map_err(|e| Error::Precondition(format!("tools pod exec failed: {e}")))?;
            Ok(String::from_utf8_lossy(&buf).into_owned())
        };
        match tokio::time::timeout(self.storage_command_timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(
                self.storage_command_timeout,
                format!("exec in {namespace}/{pod_name}"),
            )),
        }
    }
}

fn deployment_info(namespace: &str, name: &str, deployment: &Deployment) -> DeploymentInfo {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0)
        .max(0) as u32;
    let observed = deployment
        .status
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0)
        .max(0) as u32;
    DeploymentInfo {
        namespace: namespace.to_string(),
        name: name.to_string(),
        desired_replicas: desired,
        observed_replicas: observed,
    }
}

/// `true` if the deployment's pod template pins it to `node` via a node selector or a required
/// node-affinity term.
fn is_pinned_to_node(deployment: &Deployment, node: &str) -> bool {
    let Some(pod_spec) = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
    else {
        return false;
    };

    let selector_match = pod_spec
        .node_selector
        .as_ref()
        .and_then(|sel: &BTreeMap<String, String>| sel.get(NODE_SELECTOR_KEY))
        .map(|v| v == node)
        .unwrap_or(false);
    if selector_match {
        return true;
    }

    pod_spec
        .affinity
        .as_ref()
        .and_then(|a| a.node_affinity.as_ref())
        .and_then(|na| na.required_during_scheduling_ignored_during_execution.as_ref())
        .map(|selector| {
            selector.node_selector_terms.iter().any(|term| {
                term.match_expressions.iter().flatten().any(|expr| {
                    expr.key == NODE_SELECTOR_KEY
                        && expr.values.as_ref().is_some_and(|v| v.iter().any(|x| x == node))
                })
            })
        })
        .unwrap_or(false)
}

#[async_trait::async_trait]
impl Gateway for KubeGateway {
    #[instrument(skip(self, _cancel))]
    async fn list_node_pinned_deployments(
        &self,
        namespace: &str,
        node: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<DeploymentInfo>> {
        let list = match tokio::time::timeout(
            self.api_timeout,
            self.deployments(namespace).list(&Default::default()),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Timeout(
                    self.api_timeout,
                    format!("list deployments in {namespace}"),
                ))
            }
        };
        Ok(list
            .items
            .iter()
            .filter(|d| is_pinned_to_node(d, node))
            .map(|d| {
                let name = d.metadata.name.clone().unwrap_or_default();
                deployment_info(namespace, &name, d)
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
        match tokio::time::timeout(self.api_timeout, self.deployments(namespace).get(name)).await {
            Ok(Ok(d)) => Ok(Some(deployment_info(namespace, name, &d))),
            Ok(Err(kube::Error::Api(e))) if e.code == 404 => Ok(None),
            Ok(Err(e)) => Err(Error::from(e)),
            Err(_) => Err(Error::Timeout(
                self.api_timeout,
                format!("get deployment {namespace}/{name}"),
            )),
        }
    }

    #[instrument(skip(self, _cancel))]
    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        let fut = self
            .deployments(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch));
        match tokio::time::timeout(self.api_timeout, fut).await {
            Ok(Ok(_)) => {
                info!(namespace, name, replicas, "scaled deployment");
                Ok(())
            }
            Ok(Err(kube::Error::Api(e))) if e.code == 409 => {
                Err(Error::Conflict(format!("{namespace}/{name}")))
            }
            Ok(Err(e)) => Err(Error::from(e)),
            Err(_) => Err(Error::Timeout(
                self.api_timeout,
                format!("scale {namespace}/{name}"),
            )),
        }
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
            match self.get_deployment(namespace, name, cancel).await? {
                None => return Err(Error::NotFound(format!("{namespace}/{name}"))),
                Some(d) if d.observed_replicas == replicas => return Ok(()),
                Some(_) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(opts.timeout, format!("{namespace}/{name}")));
            }
            cancel::sleep_cancellable(cancel, opts.poll_interval, "wait-for-deployment-scale")
                .await?;
        }
    }

    async fn node_exists(&self, node: &str, _cancel: &CancellationToken) -> Result<bool> {
        match tokio::time::timeout(self.api_timeout, self.nodes().get(node)).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(kube::Error::Api(e))) if e.code == 404 => Ok(false),
            Ok(Err(e)) => Err(Error::from(e)),
            Err(_) => Err(Error::Timeout(self.api_timeout, format!("get node {node}"))),
        }
    }

    #[instrument(skip(self, _cancel))]
    async fn cordon_node(&self, node: &str, _cancel: &CancellationToken) -> Result<()> {
        let patch = serde_json::json!({ "spec": { "unschedulable": true } });
        let fut = self
            .nodes()
            .patch(node, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch));
        match tokio::time::timeout(self.api_timeout, fut).await {
            Ok(Ok(_)) => {
                info!(node, "cordoned node");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::from(e)),
            Err(_) => Err(Error::Timeout(self.api_timeout, format!("cordon {node}"))),
        }
    }

    #[instrument(skip(self, _cancel))]
    async fn uncordon_node(&self, node: &str, _cancel: &CancellationToken) -> Result<()> {
        let patch = serde_json::json!({ "spec": { "unschedulable": null } });
        let fut = self
            .nodes()
            .patch(node, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch));
        match tokio::time::timeout(self.api_timeout, fut).await {
            Ok(Ok(_)) => {
                info!(node, "uncordoned node");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::from(e)),
            Err(_) => Err(Error::Timeout(self.api_timeout, format!("uncordon {node}"))),
        }
    }

    async fn tools_pod_ready(&self, namespace: &str, _cancel: &CancellationToken) -> Result<bool> {
        match tokio::time::timeout(self.api_timeout, self.pods(namespace).get(&self.tools_pod_name))
            .await
        {
            Ok(Ok(pod)) => Ok(pod
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .map(|phase| phase == "Running")
                .unwrap_or(false)),
            Ok(Err(kube::Error::Api(e))) if e.code == 404 => Ok(false),
            Ok(Err(e)) => Err(Error::from(e)),
            Err(_) => Err(Error::Timeout(
                self.api_timeout,
                format!("get tools pod {namespace}/{}", self.tools_pod_name),
            )),
        }
    }

    #[instrument(skip(self, _cancel))]
    async fn set_noout(&self, namespace: &str, _cancel: &CancellationToken) -> Result<()> {
        self.exec_in_tools_pod(
            namespace,
            &self.tools_pod_name,
            vec!["ceph", "osd", "set", "noout"],
        )
        .await?;
        info!(namespace, "set noout flag");
        Ok(())
    }

    #[instrument(skip(self, _cancel))]
    async fn unset_noout(&self, namespace: &str, _cancel: &CancellationToken) -> Result<()> {
        self.exec_in_tools_pod(
            namespace,
            &self.tools_pod_name,
            vec!["ceph", "osd", "unset", "noout"],
        )
        .await?;
        info!(namespace, "unset noout flag");
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
            let status = self
                .exec_in_tools_pod(namespace, &self.tools_pod_name, vec!["ceph", "quorum_status"])
                .await;
            if let Ok(out) = status {
                if out.contains("\"quorum\"") {
                    return Ok(());
                }
            } else {
                warn!(namespace, "quorum status probe failed, retrying");
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(opts.timeout, format!("monitor quorum in {namespace}")));
            }
            cancel::sleep_cancellable(cancel, opts.poll_interval, "wait-for-monitor-quorum").await?;
        }
    }
}
