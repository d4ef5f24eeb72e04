use super::parsing::parse_resource_ref;
use super::types::{Gvr, ResourceKind};
use super::{Context, ContextError};
use crate::conditions::{
    daemonset_ready, deployment_available, has_condition, phase_is, pod_ready, statefulset_ready,
};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, Service};
use std::time::Duration;
use tracing::{debug, info};

impl Context {
    /// Wait for a resource to become ready
    ///
    /// Understands common readiness patterns:
    /// - `deployment/name` - all replicas available
    /// - `pod/name` - Running with all containers ready
    /// - `statefulset/name` - all replicas ready
    /// - `daemonset/name` - all desired pods updated and ready
    /// - `service/name` - exists
    /// - `vm/name` - condition `Ready=True`
    /// - `vmi/name` - condition `Ready=True`
    /// - `dv/name` - phase `Succeeded`
    ///
    /// Uses the suite's `wait_timeout`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// ctx.wait_ready("ds/virt-handler").await?;
    /// ctx.wait_ready("vm/fedora").await?;
    /// ```
    pub async fn wait_ready(&self, resource: &str) -> Result<(), ContextError> {
        self.wait_ready_with_timeout(resource, self.config.wait_timeout)
            .await
    }

    /// Wait for a resource to become ready with a custom timeout
    pub async fn wait_ready_with_timeout(
        &self,
        resource: &str,
        timeout: Duration,
    ) -> Result<(), ContextError> {
        let (kind, name) = parse_resource_ref(resource)?;

        debug!(
            namespace = %self.namespace,
            resource = %resource,
            timeout = ?timeout,
            "Waiting for resource to be ready"
        );

        match kind {
            ResourceKind::Deployment => {
                self.wait_until::<Deployment, _>(name, deployment_available(), timeout)
                    .await?;
            }
            ResourceKind::Pod => {
                self.wait_until::<Pod, _>(name, pod_ready(), timeout).await?;
            }
            ResourceKind::StatefulSet => {
                self.wait_until::<StatefulSet, _>(name, statefulset_ready(), timeout)
                    .await?;
            }
            ResourceKind::DaemonSet => {
                self.wait_until::<DaemonSet, _>(name, daemonset_ready(), timeout)
                    .await?;
            }
            ResourceKind::Service => {
                // Services have no ready state; wait for existence
                let exists = |obj: Option<&Service>| obj.is_some();
                self.wait_until::<Service, _>(name, exists, timeout).await?;
            }
            ResourceKind::VirtualMachine => {
                self.wait_for_dynamic(
                    &Gvr::virtual_machine(),
                    name,
                    has_condition("Ready", "True"),
                    timeout,
                )
                .await?;
            }
            ResourceKind::VirtualMachineInstance => {
                self.wait_for_dynamic(
                    &Gvr::virtual_machine_instance(),
                    name,
                    has_condition("Ready", "True"),
                    timeout,
                )
                .await?;
            }
            ResourceKind::DataVolume => {
                self.wait_for_dynamic(&Gvr::data_volume(), name, phase_is("Succeeded"), timeout)
                    .await?;
            }
        }

        info!(
            namespace = %self.namespace,
            resource = %resource,
            "Resource is ready"
        );

        Ok(())
    }
}
