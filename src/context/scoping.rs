use super::types::Gvr;
use super::{Context, ContextError};
use crate::registry::{FixtureArgs, FixtureRegistry, RegistryError};
use crate::scoped::{Lifecycle, ScopeOptions};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::core::{ClusterResourceScope, NamespaceResourceScope};
use kube::runtime::wait::Condition;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;

type ReadyCheck<K> = Arc<dyn Fn(Option<&K>) -> bool + Send + Sync>;

/// A cluster object managed by a [`Scoped`](crate::scoped::Scoped) guard
///
/// Created with [`Context::scoped_object`], [`Context::scoped_cluster_object`]
/// or [`Context::scoped_dynamic`].
pub struct KubeObject<K> {
    api: Api<K>,
    object: K,
    kind: String,
    name: String,
    reference: String,
    ready: Option<ReadyCheck<K>>,
}

/// An unstructured (CRD) object managed by a scoped guard
pub type DynamicResource = KubeObject<DynamicObject>;

impl<K> KubeObject<K> {
    /// Readiness condition checked after creation
    ///
    /// ```ignore
    /// let vm = ctx
    ///     .scoped_dynamic(&Gvr::virtual_machine(), &fedora)?
    ///     .ready_when(printable_status("Running"));
    /// ```
    #[must_use]
    pub fn ready_when<C>(mut self, condition: C) -> Self
    where
        K: 'static,
        C: Condition<K> + Send + Sync + 'static,
    {
        self.ready = Some(Arc::new(move |obj: Option<&K>| condition.matches_object(obj)));
        self
    }

    /// The object as submitted
    pub fn object(&self) -> &K {
        &self.object
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl<K> Lifecycle for KubeObject<K>
where
    K: Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    fn describe(&self) -> String {
        self.reference.clone()
    }

    async fn create(&self) -> Result<(), ContextError> {
        self.api
            .create(&PostParams::default(), &self.object)
            .await
            .map_err(|e| {
                ContextError::from_kube(&e, &self.kind, &self.name, ContextError::CreateError)
            })?;
        Ok(())
    }

    async fn is_ready(&self) -> Result<bool, ContextError> {
        let Some(ready) = &self.ready else {
            return Ok(true);
        };
        let current = self.api.get_opt(&self.name).await.map_err(|e| {
            ContextError::from_kube(&e, &self.kind, &self.name, ContextError::GetError)
        })?;
        Ok(ready(current.as_ref()))
    }

    async fn exists(&self) -> Result<bool, ContextError> {
        self.api
            .get_opt(&self.name)
            .await
            .map(|found| found.is_some())
            .map_err(|e| {
                ContextError::from_kube(&e, &self.kind, &self.name, ContextError::GetError)
            })
    }

    async fn delete(&self) -> Result<(), ContextError> {
        match self.api.delete(&self.name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(e) if crate::classify::is_not_found(&e) => Ok(()),
            Err(e) => Err(ContextError::from_kube(
                &e,
                &self.kind,
                &self.name,
                ContextError::DeleteError,
            )),
        }
    }
}

fn required_name(name: Option<&String>, kind: &str) -> Result<String, ContextError> {
    name.cloned()
        .ok_or_else(|| ContextError::CreateError(format!("{kind} must have metadata.name")))
}

impl Context {
    /// Scope options using the suite's wait and delete budgets
    pub fn scope_options(&self) -> ScopeOptions {
        ScopeOptions::from_config(&self.config)
    }

    /// Wrap a namespaced object for [`scoped`](crate::scoped::scoped)
    ///
    /// ```ignore
    /// scoped(ctx.scoped_object(&config_map)?, ctx.scope_options(), |cm| async move {
    ///     // ...
    /// })
    /// .await?;
    /// ```
    pub fn scoped_object<K>(&self, object: &K) -> Result<KubeObject<K>, ContextError>
    where
        K: kube::Resource<Scope = NamespaceResourceScope> + Clone,
        <K as kube::Resource>::DynamicType: Default,
    {
        let kind = K::kind(&Default::default()).to_string();
        let mut object = object.clone();
        object.meta_mut().namespace = Some(self.namespace.clone());
        let name = required_name(object.meta().name.as_ref(), &kind)?;

        Ok(KubeObject {
            api: Api::namespaced(self.client.clone(), &self.namespace),
            reference: format!("{}/{name}", kind.to_lowercase()),
            object,
            kind,
            name,
            ready: None,
        })
    }

    /// Wrap a cluster-scoped object for [`scoped`](crate::scoped::scoped)
    pub fn scoped_cluster_object<K>(&self, object: &K) -> Result<KubeObject<K>, ContextError>
    where
        K: kube::Resource<Scope = ClusterResourceScope> + Clone,
        <K as kube::Resource>::DynamicType: Default,
    {
        let kind = K::kind(&Default::default()).to_string();
        let name = required_name(object.meta().name.as_ref(), &kind)?;

        Ok(KubeObject {
            api: Api::all(self.client.clone()),
            reference: format!("{}/{name}", kind.to_lowercase()),
            object: object.clone(),
            kind,
            name,
            ready: None,
        })
    }

    /// Wrap an unstructured object for [`scoped`](crate::scoped::scoped)
    pub fn scoped_dynamic(
        &self,
        gvr: &Gvr,
        object: &serde_json::Value,
    ) -> Result<DynamicResource, ContextError> {
        let (object, name) = self.dynamic_object(gvr, object)?;

        Ok(KubeObject {
            api: self.dynamic_api(gvr),
            reference: gvr.reference(&name),
            object,
            kind: gvr.kind.clone(),
            name,
            ready: None,
        })
    }

    /// Build a registered fixture for this context's namespace
    pub fn resolve_fixture<T>(
        &self,
        registry: &FixtureRegistry<T>,
        fixture: &str,
        name: &str,
    ) -> Result<T, RegistryError> {
        registry.resolve(fixture, &FixtureArgs::new(self.namespace.clone(), name))
    }
}
