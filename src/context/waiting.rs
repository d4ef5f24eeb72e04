use super::parsing::extract_resource_name;
use super::types::Gvr;
use super::{Context, ContextError};
use crate::classify;
use crate::sampler::{SamplerError, TimeoutSampler};
use crate::truthy::Truthy;
use crate::wait::{status_summary, ResourceState, TimeoutExpired, WaitEvent};
use k8s_openapi::api::core::v1::Event;
use kube::api::{Api, DynamicObject, ListParams};
use kube::runtime::wait::Condition;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, info};

/// Recent events attached to a timeout
const MAX_TIMEOUT_EVENTS: usize = 5;

/// One poll of an object: the object and whether the condition held
struct Observation<K> {
    object: K,
    matched: bool,
    state: String,
}

impl<K> Debug for Observation<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.state)
    }
}

impl<K> Truthy for Observation<K> {
    fn is_truthy(&self) -> bool {
        self.matched
    }
}

/// Where and how to poll one object
struct Target<'a, K> {
    api: Api<K>,
    kind: &'a str,
    name: &'a str,
    reference: String,
    /// Namespace searched for events on timeout
    events_namespace: Option<&'a str>,
}

impl Context {
    /// Wait for a namespaced resource to satisfy a predicate
    ///
    /// Uses the suite's `wait_timeout` and `poll_interval`. A resource that does
    /// not exist yet counts as "not yet"; any other API error aborts the wait.
    ///
    /// Accepts both `"name"` and `"kind/name"` formats.
    ///
    /// # Example
    ///
    /// ```ignore
    /// ctx.wait_for::<ConfigMap, _>("cloud-init", |cm| {
    ///     cm.data.as_ref().is_some_and(|d| d.contains_key("userdata"))
    /// }).await?;
    /// ```
    pub async fn wait_for<K, F>(&self, name: &str, condition: F) -> Result<K, ContextError>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        <K as kube::Resource>::DynamicType: Default,
        F: Fn(&K) -> bool,
    {
        self.wait_for_with_timeout(name, condition, self.config.wait_timeout)
            .await
    }

    /// Wait for a namespaced resource with a custom timeout
    pub async fn wait_for_with_timeout<K, F>(
        &self,
        name: &str,
        condition: F,
        timeout: Duration,
    ) -> Result<K, ContextError>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        <K as kube::Resource>::DynamicType: Default,
        F: Fn(&K) -> bool,
    {
        self.wait_until(
            name,
            |obj: Option<&K>| obj.is_some_and(|o| condition(o)),
            timeout,
        )
        .await
    }

    /// Wait for a namespaced resource to satisfy a kube [`Condition`]
    ///
    /// ```ignore
    /// use virtwait::conditions::pod_ready;
    ///
    /// let pod = ctx.wait_until::<Pod, _>("virt-launcher-fedora", pod_ready(), TIMEOUT_4MIN).await?;
    /// ```
    pub async fn wait_until<K, C>(
        &self,
        name: &str,
        condition: C,
        timeout: Duration,
    ) -> Result<K, ContextError>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        <K as kube::Resource>::DynamicType: Default,
        C: Condition<K>,
    {
        let name = extract_resource_name(name);
        let kind = K::kind(&Default::default()).to_string();
        let target = Target {
            api: Api::namespaced(self.client.clone(), &self.namespace),
            kind: &kind,
            name,
            reference: format!("{}/{name}", kind.to_lowercase()),
            events_namespace: Some(&self.namespace),
        };
        self.poll_object(target, condition, status_summary::<K>, timeout)
            .await
    }

    /// Wait for a cluster-scoped resource to satisfy a kube [`Condition`]
    pub async fn wait_for_cluster<K, C>(
        &self,
        name: &str,
        condition: C,
        timeout: Duration,
    ) -> Result<K, ContextError>
    where
        K: kube::Resource<Scope = kube::core::ClusterResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        <K as kube::Resource>::DynamicType: Default,
        C: Condition<K>,
    {
        let name = extract_resource_name(name);
        let kind = K::kind(&Default::default()).to_string();
        let target = Target {
            api: Api::all(self.client.clone()),
            kind: &kind,
            name,
            reference: format!("{}/{name}", kind.to_lowercase()),
            events_namespace: None,
        };
        self.poll_object(target, condition, status_summary::<K>, timeout)
            .await
    }

    /// Wait for a dynamic resource to satisfy a kube [`Condition`]
    ///
    /// ```ignore
    /// use virtwait::conditions::printable_status;
    ///
    /// ctx.wait_for_dynamic(&Gvr::virtual_machine(), "fedora", printable_status("Running"), TIMEOUT_4MIN).await?;
    /// ```
    pub async fn wait_for_dynamic<C>(
        &self,
        gvr: &Gvr,
        name: &str,
        condition: C,
        timeout: Duration,
    ) -> Result<DynamicObject, ContextError>
    where
        C: Condition<DynamicObject>,
    {
        let name = extract_resource_name(name);
        let target = Target {
            api: self.dynamic_api(gvr),
            kind: &gvr.kind,
            name,
            reference: gvr.reference(name),
            events_namespace: gvr.namespaced.then_some(self.namespace.as_str()),
        };
        self.poll_object(
            target,
            condition,
            <DynamicObject as ResourceState>::state_description,
            timeout,
        )
        .await
    }

    /// Wait for a namespaced resource to be deleted
    ///
    /// Uses the suite's `delete_timeout`.
    ///
    /// ```ignore
    /// ctx.delete::<Pod>("worker").await?;
    /// ctx.wait_deleted::<Pod>("pod/worker").await?;
    /// ```
    pub async fn wait_deleted<K>(&self, name: &str) -> Result<(), ContextError>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        self.wait_deleted_with_timeout::<K>(name, self.config.delete_timeout)
            .await
    }

    /// Wait for a namespaced resource to be deleted with a custom timeout
    pub async fn wait_deleted_with_timeout<K>(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<(), ContextError>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let name = extract_resource_name(name);
        let kind = K::kind(&Default::default()).to_string();
        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);
        self.poll_gone(&api, &kind, name, timeout).await
    }

    /// Wait for a cluster-scoped resource to be deleted
    pub async fn wait_deleted_cluster<K>(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<(), ContextError>
    where
        K: kube::Resource<Scope = kube::core::ClusterResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let name = extract_resource_name(name);
        let kind = K::kind(&Default::default()).to_string();
        let api: Api<K> = Api::all(self.client.clone());
        self.poll_gone(&api, &kind, name, timeout).await
    }

    /// Wait for a dynamic resource to be deleted
    pub async fn wait_dynamic_deleted(
        &self,
        gvr: &Gvr,
        name: &str,
        timeout: Duration,
    ) -> Result<(), ContextError> {
        let name = extract_resource_name(name);
        let api = self.dynamic_api(gvr);
        self.poll_gone(&api, &gvr.kind, name, timeout).await
    }

    async fn poll_object<K, C>(
        &self,
        target: Target<'_, K>,
        condition: C,
        describe: fn(&K) -> String,
        timeout: Duration,
    ) -> Result<K, ContextError>
    where
        K: Clone + DeserializeOwned + Debug,
        C: Condition<K>,
    {
        let Target {
            api,
            kind,
            name,
            reference,
            events_namespace,
        } = target;

        debug!(
            namespace = %self.namespace,
            resource = %reference,
            timeout = ?timeout,
            "Starting wait"
        );

        let api = &api;
        let condition = &condition;
        let result = TimeoutSampler::new(move || async move {
            let object = api
                .get(name)
                .await
                .map_err(|e| ContextError::from_kube(&e, kind, name, ContextError::GetError))?;
            let matched = condition.matches_object(Some(&object));
            let state = describe(&object);
            Ok::<_, ContextError>(Observation {
                object,
                matched,
                state,
            })
        })
        .timeout(timeout)
        .sleep(self.config.poll_interval)
        .suppress(classify::not_found())
        .label(reference.clone())
        .wait_truthy()
        .await;

        match result {
            Ok(observation) => {
                info!(
                    namespace = %self.namespace,
                    resource = %reference,
                    "Condition met"
                );
                Ok(observation.object)
            }
            Err(SamplerError::Timeout(t)) => {
                Err(self.with_recent_events(t, events_namespace, name).await.into())
            }
            Err(SamplerError::Unexpected(e)) => Err(e),
        }
    }

    async fn poll_gone<K>(
        &self,
        api: &Api<K>,
        kind: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<(), ContextError>
    where
        K: Clone + DeserializeOwned + Debug,
    {
        let reference = format!("deletion of {}/{name}", kind.to_lowercase());
        debug!(
            namespace = %self.namespace,
            resource = %reference,
            timeout = ?timeout,
            "Starting wait"
        );

        TimeoutSampler::new(move || async move {
            api.get_opt(name)
                .await
                .map(|found| found.is_none())
                .map_err(|e| ContextError::from_kube(&e, kind, name, ContextError::GetError))
        })
        .timeout(timeout)
        .sleep(self.config.poll_interval)
        .label(reference.clone())
        .describe_with(|gone: &bool| if *gone { "gone" } else { "still exists" }.to_string())
        .wait_truthy()
        .await?;

        debug!(namespace = %self.namespace, resource = %reference, "Resource deleted");
        Ok(())
    }

    /// Attach the latest events about `name` to a timeout, best effort
    async fn with_recent_events(
        &self,
        timeout: TimeoutExpired,
        namespace: Option<&str>,
        name: &str,
    ) -> TimeoutExpired {
        let Some(namespace) = namespace else {
            return timeout;
        };
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().fields(&format!("involvedObject.name={name}"));

        match api.list(&params).await {
            Ok(list) => timeout.with_events(recent_events(list.items)),
            Err(e) => {
                debug!(error = %e, "Could not fetch events for timeout report");
                timeout
            }
        }
    }
}

/// Newest events last, keeping at most [`MAX_TIMEOUT_EVENTS`]
fn recent_events(mut events: Vec<Event>) -> Vec<WaitEvent> {
    events.sort_by_key(|e| {
        e.last_timestamp
            .as_ref()
            .and_then(|t| serde_json::to_value(t).ok())
            .and_then(|v| v.as_str().map(str::to_string))
    });
    let skip = events.len().saturating_sub(MAX_TIMEOUT_EVENTS);
    events.iter().skip(skip).map(WaitEvent::from).collect()
}
