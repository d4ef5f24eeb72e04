use super::types::Gvr;
use super::{Context, ContextError};
use crate::diagnostics::Diagnostics;
use crate::wait::ResourceState;
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::api::{Api, ListParams, LogParams};
use std::collections::BTreeMap;
use tracing::{debug, warn};

impl Context {
    /// Events in the test namespace
    pub async fn events(&self) -> Result<Vec<Event>, ContextError> {
        let events: Api<Event> = Api::namespaced(self.client.clone(), &self.namespace);

        let list = events
            .list(&ListParams::default())
            .await
            .map_err(|e| ContextError::EventsError(e.to_string()))?;

        Ok(list.items)
    }

    /// Logs of every pod in the test namespace, by pod name
    ///
    /// Pods without logs yet map to an error note rather than failing the call.
    pub async fn collect_pod_logs(&self) -> Result<BTreeMap<String, String>, ContextError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);

        let pod_list = pods
            .list(&ListParams::default())
            .await
            .map_err(|e| ContextError::ListError(e.to_string()))?;

        let mut logs_map = BTreeMap::new();

        for pod in pod_list.items {
            let Some(pod_name) = pod.metadata.name else {
                continue;
            };

            let params = LogParams {
                tail_lines: Some(200),
                ..Default::default()
            };
            let logs = match pods.logs(&pod_name, &params).await {
                Ok(logs) => logs,
                Err(e) => format!("[error getting logs: {e}]"),
            };

            logs_map.insert(pod_name, logs);
        }

        Ok(logs_map)
    }

    /// State of every virtual machine instance in the test namespace
    pub async fn collect_vm_states(&self) -> Result<BTreeMap<String, String>, ContextError> {
        let vmis = self.list_dynamic(&Gvr::virtual_machine_instance()).await?;
        Ok(vmis
            .into_iter()
            .filter_map(|vmi| {
                let state = vmi.state_description();
                vmi.metadata.name.map(|name| (name, state))
            })
            .collect())
    }

    /// Gather VM states, pod logs and events, best effort
    ///
    /// Called by the `#[virtwait::test]` macro when a test fails.
    pub async fn collect_diagnostics(&self) -> Diagnostics {
        let mut diag = Diagnostics::new(self.namespace.clone());

        match self.collect_vm_states().await {
            Ok(states) => diag.vm_states = states,
            // KubeVirt may not be installed
            Err(e) => debug!(error = %e, "Skipping VM states in diagnostics"),
        }

        match self.collect_pod_logs().await {
            Ok(logs) => diag.pod_logs = logs,
            Err(e) => warn!(error = %e, "Failed to collect pod logs for diagnostics"),
        }

        match self.events().await {
            Ok(events) => diag.events = events,
            Err(e) => warn!(error = %e, "Failed to collect events for diagnostics"),
        }

        diag
    }
}
