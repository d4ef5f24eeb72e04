use super::{Context, ContextError};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::{ClusterResourceScope, NamespaceResourceScope};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::info;

fn object_name<K: kube::Resource>(resource: &K) -> Result<String, ContextError> {
    resource
        .meta()
        .name
        .clone()
        .ok_or_else(|| ContextError::ApplyError("resource must have a name".to_string()))
}

impl Context {
    /// Apply a resource to the test namespace
    ///
    /// Server-side apply with the suite's field manager: creates the resource
    /// if missing, updates it otherwise. Any namespace in the metadata is
    /// replaced with the test namespace.
    pub async fn apply<K>(&self, resource: &K) -> Result<K, ContextError>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);

        let mut resource = resource.clone();
        resource.meta_mut().namespace = Some(self.namespace.clone());
        let name = object_name(&resource)?;

        let params = PatchParams::apply(&self.config.field_manager).force();
        let kind = K::kind(&Default::default()).to_string();
        let applied = api
            .patch(&name, &params, &Patch::Apply(&resource))
            .await
            .map_err(|e| ContextError::from_kube(&e, &kind, &name, ContextError::ApplyError))?;

        info!(
            namespace = %self.namespace,
            kind = %kind,
            name = %name,
            "Applied resource"
        );

        Ok(applied)
    }

    /// Apply a cluster-scoped resource (create or update)
    pub async fn apply_cluster<K>(&self, resource: &K) -> Result<K, ContextError>
    where
        K: kube::Resource<Scope = ClusterResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let name = object_name(resource)?;

        let params = PatchParams::apply(&self.config.field_manager).force();
        let kind = K::kind(&Default::default()).to_string();
        let applied = api
            .patch(&name, &params, &Patch::Apply(resource))
            .await
            .map_err(|e| ContextError::from_kube(&e, &kind, &name, ContextError::ApplyError))?;

        info!(kind = %kind, name = %name, "Applied cluster-scoped resource");

        Ok(applied)
    }

    /// Create a resource in the test namespace
    ///
    /// Unlike [`apply`](Self::apply), fails with [`ContextError::Conflict`] when
    /// the object already exists.
    pub async fn create<K>(&self, resource: &K) -> Result<K, ContextError>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);

        let mut resource = resource.clone();
        resource.meta_mut().namespace = Some(self.namespace.clone());
        let name = object_name(&resource)?;
        let kind = K::kind(&Default::default()).to_string();

        let created = api
            .create(&PostParams::default(), &resource)
            .await
            .map_err(|e| ContextError::from_kube(&e, &kind, &name, ContextError::CreateError))?;

        info!(
            namespace = %self.namespace,
            kind = %kind,
            name = %name,
            "Created resource"
        );

        Ok(created)
    }

    /// Get a resource from the test namespace
    ///
    /// A missing object is reported as [`ContextError::NotFound`].
    pub async fn get<K>(&self, name: &str) -> Result<K, ContextError>
    where
        K: kube::Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);
        let kind = K::kind(&Default::default()).to_string();

        api.get(name)
            .await
            .map_err(|e| ContextError::from_kube(&e, &kind, name, ContextError::GetError))
    }

    /// Get a cluster-scoped resource
    pub async fn get_cluster<K>(&self, name: &str) -> Result<K, ContextError>
    where
        K: kube::Resource<Scope = ClusterResourceScope> + Clone + DeserializeOwned + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let kind = K::kind(&Default::default()).to_string();

        api.get(name)
            .await
            .map_err(|e| ContextError::from_kube(&e, &kind, name, ContextError::GetError))
    }

    /// Delete a resource from the test namespace
    pub async fn delete<K>(&self, name: &str) -> Result<(), ContextError>
    where
        K: kube::Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);
        let kind = K::kind(&Default::default()).to_string();

        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| ContextError::from_kube(&e, &kind, name, ContextError::DeleteError))?;

        info!(
            namespace = %self.namespace,
            kind = %kind,
            name = %name,
            "Deleted resource"
        );

        Ok(())
    }

    /// Delete a cluster-scoped resource
    pub async fn delete_cluster<K>(&self, name: &str) -> Result<(), ContextError>
    where
        K: kube::Resource<Scope = ClusterResourceScope> + Clone + DeserializeOwned + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let kind = K::kind(&Default::default()).to_string();

        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| ContextError::from_kube(&e, &kind, name, ContextError::DeleteError))?;

        info!(kind = %kind, name = %name, "Deleted cluster-scoped resource");

        Ok(())
    }

    /// List resources of a given type in the test namespace
    pub async fn list<K>(&self) -> Result<Vec<K>, ContextError>
    where
        K: kube::Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);
        let kind = K::kind(&Default::default()).to_string();

        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| ContextError::ListError(format!("failed to list {kind}: {e}")))?;

        Ok(list.items)
    }
}
