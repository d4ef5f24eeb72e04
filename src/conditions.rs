//! Readiness predicates for cluster objects
//!
//! Each function returns a [`Condition`] usable with `Context::wait_until`,
//! `Context::wait_for_dynamic` and [`KubeObject::ready_when`](crate::context::KubeObject::ready_when).
//! A missing object never satisfies a condition.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::DynamicObject;
use kube::runtime::wait::Condition;

/// Namespace phase is `Active`
pub fn namespace_active() -> impl Condition<Namespace> {
    |obj: Option<&Namespace>| {
        obj.and_then(|ns| ns.status.as_ref())
            .and_then(|s| s.phase.as_deref())
            == Some("Active")
    }
}

/// Rollout observed and every desired replica available
pub fn deployment_available() -> impl Condition<Deployment> {
    |obj: Option<&Deployment>| {
        let Some(deployment) = obj else {
            return false;
        };
        let Some(status) = &deployment.status else {
            return false;
        };

        let generation_observed = match (deployment.metadata.generation, status.observed_generation) {
            (Some(generation), Some(observed)) => observed >= generation,
            (None, _) => true,
            (Some(_), None) => false,
        };
        let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let available = status.available_replicas.unwrap_or(0);

        generation_observed && available >= desired && status.unavailable_replicas.unwrap_or(0) == 0
    }
}

/// Every scheduled daemon pod is updated and ready
///
/// A DaemonSet whose node selector matches no node is ready once the
/// controller has observed its current generation.
pub fn daemonset_ready() -> impl Condition<DaemonSet> {
    |obj: Option<&DaemonSet>| {
        let Some(ds) = obj else {
            return false;
        };
        let Some(status) = &ds.status else {
            return false;
        };
        let observed = match (ds.metadata.generation, status.observed_generation) {
            (Some(generation), Some(seen)) => seen >= generation,
            (Some(_), None) => false,
            (None, _) => true,
        };
        let desired = status.desired_number_scheduled;
        observed
            && status.number_ready >= desired
            && status.updated_number_scheduled.unwrap_or(0) >= desired
    }
}

/// Ready replicas reached the desired count
pub fn statefulset_ready() -> impl Condition<StatefulSet> {
    |obj: Option<&StatefulSet>| {
        let Some(sts) = obj else {
            return false;
        };
        let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let ready = sts.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
        ready >= desired
    }
}

/// Pod is `Running` with every container ready
pub fn pod_ready() -> impl Condition<Pod> {
    |obj: Option<&Pod>| {
        let Some(status) = obj.and_then(|p| p.status.as_ref()) else {
            return false;
        };
        if status.phase.as_deref() != Some("Running") {
            return false;
        }
        status
            .container_statuses
            .as_ref()
            .is_some_and(|containers| !containers.is_empty() && containers.iter().all(|c| c.ready))
    }
}

/// `status.conditions` holds an entry `type` with the given `status`
///
/// ```ignore
/// ctx.wait_for_dynamic(&Gvr::virtual_machine(), "fedora", has_condition("Ready", "True"), timeout).await?;
/// ```
pub fn has_condition(
    condition_type: impl Into<String>,
    status: impl Into<String>,
) -> impl Condition<DynamicObject> {
    let condition_type = condition_type.into();
    let status = status.into();
    move |obj: Option<&DynamicObject>| {
        obj.and_then(|o| o.data.get("status"))
            .and_then(|s| s.get("conditions"))
            .and_then(|c| c.as_array())
            .is_some_and(|conditions| {
                conditions.iter().any(|c| {
                    c.get("type").and_then(|v| v.as_str()) == Some(condition_type.as_str())
                        && c.get("status").and_then(|v| v.as_str()) == Some(status.as_str())
                })
            })
    }
}

/// `status.phase` equals `phase`
pub fn phase_is(phase: impl Into<String>) -> impl Condition<DynamicObject> {
    let phase = phase.into();
    move |obj: Option<&DynamicObject>| status_str(obj, "phase") == Some(phase.as_str())
}

/// `status.printableStatus` equals `printable`, e.g. `Running` or `Stopped` for a VM
pub fn printable_status(printable: impl Into<String>) -> impl Condition<DynamicObject> {
    let printable = printable.into();
    move |obj: Option<&DynamicObject>| status_str(obj, "printableStatus") == Some(printable.as_str())
}

fn status_str<'a>(obj: Option<&'a DynamicObject>, field: &str) -> Option<&'a str> {
    obj?.data.get("status")?.get(field)?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DaemonSetStatus, DeploymentSpec, DeploymentStatus};
    use k8s_openapi::api::core::v1::{ContainerStatus, NamespaceStatus, PodStatus};
    use serde_json::json;

    fn dynamic(status: serde_json::Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "kubevirt.io/v1",
            "kind": "VirtualMachine",
            "metadata": { "name": "fedora" },
            "status": status,
        }))
        .unwrap()
    }

    #[test]
    fn test_namespace_active() {
        let ns = Namespace {
            status: Some(NamespaceStatus {
                phase: Some("Active".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(namespace_active().matches_object(Some(&ns)));
        assert!(!namespace_active().matches_object(Some(&Namespace::default())));
        assert!(!namespace_active().matches_object(None));
    }

    #[test]
    fn test_deployment_available() {
        let mut deployment = Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(2),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                available_replicas: Some(1),
                unavailable_replicas: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!deployment_available().matches_object(Some(&deployment)));

        deployment.status = Some(DeploymentStatus {
            available_replicas: Some(2),
            ..Default::default()
        });
        assert!(deployment_available().matches_object(Some(&deployment)));

        deployment.metadata.generation = Some(3);
        assert!(
            !deployment_available().matches_object(Some(&deployment)),
            "generation not observed yet"
        );
    }

    #[test]
    fn test_daemonset_ready() {
        let mut ds = DaemonSet {
            status: Some(DaemonSetStatus {
                desired_number_scheduled: 3,
                number_ready: 3,
                updated_number_scheduled: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!daemonset_ready().matches_object(Some(&ds)));

        if let Some(status) = ds.status.as_mut() {
            status.updated_number_scheduled = Some(3);
        }
        assert!(daemonset_ready().matches_object(Some(&ds)));
    }

    #[test]
    fn test_daemonset_scheduled_on_no_nodes() {
        let mut ds = DaemonSet {
            status: Some(DaemonSetStatus {
                desired_number_scheduled: 0,
                number_ready: 0,
                observed_generation: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        ds.metadata.generation = Some(2);
        assert!(
            !daemonset_ready().matches_object(Some(&ds)),
            "controller has not seen the latest spec"
        );

        if let Some(status) = ds.status.as_mut() {
            status.observed_generation = Some(2);
        }
        assert!(daemonset_ready().matches_object(Some(&ds)));
        assert!(!daemonset_ready().matches_object(None));
    }

    #[test]
    fn test_pod_ready() {
        let container = |ready| ContainerStatus {
            name: "compute".to_string(),
            ready,
            ..Default::default()
        };
        let pod = |phase: &str, containers| Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: Some(containers),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(pod_ready().matches_object(Some(&pod("Running", vec![container(true)]))));
        assert!(!pod_ready().matches_object(Some(&pod("Running", vec![container(false)]))));
        assert!(!pod_ready().matches_object(Some(&pod("Pending", vec![container(true)]))));
        assert!(!pod_ready().matches_object(Some(&pod("Running", vec![]))));
    }

    #[test]
    fn test_dynamic_conditions() {
        let vm = dynamic(json!({
            "printableStatus": "Running",
            "conditions": [
                { "type": "Ready", "status": "True" },
                { "type": "LiveMigratable", "status": "False" }
            ]
        }));

        assert!(has_condition("Ready", "True").matches_object(Some(&vm)));
        assert!(!has_condition("LiveMigratable", "True").matches_object(Some(&vm)));
        assert!(!has_condition("Paused", "True").matches_object(Some(&vm)));
        assert!(printable_status("Running").matches_object(Some(&vm)));
        assert!(!printable_status("Stopped").matches_object(Some(&vm)));
        assert!(!phase_is("Running").matches_object(Some(&vm)));

        let dv = dynamic(json!({ "phase": "Succeeded" }));
        assert!(phase_is("Succeeded").matches_object(Some(&dv)));
        assert!(!phase_is("Succeeded").matches_object(None));
    }
}
