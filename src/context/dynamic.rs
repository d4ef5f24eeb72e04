use super::types::Gvr;
use super::{Context, ContextError};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use tracing::info;

impl Context {
    /// Dynamic API for `gvr`, namespaced to the test namespace unless the
    /// resource is cluster-scoped
    pub(crate) fn dynamic_api(&self, gvr: &Gvr) -> Api<DynamicObject> {
        let ar = gvr.to_api_resource();
        if gvr.namespaced {
            Api::namespaced_with(self.client.clone(), &self.namespace, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        }
    }

    pub(super) fn dynamic_object(
        &self,
        gvr: &Gvr,
        obj: &serde_json::Value,
    ) -> Result<(DynamicObject, String), ContextError> {
        let mut dyn_obj: DynamicObject = serde_json::from_value(obj.clone())
            .map_err(|e| ContextError::ApplyError(format!("invalid {} object: {e}", gvr.kind)))?;

        if gvr.namespaced {
            dyn_obj.metadata.namespace = Some(self.namespace.clone());
        }

        let name = dyn_obj.metadata.name.clone().ok_or_else(|| {
            ContextError::ApplyError(format!("{} must have metadata.name", gvr.kind))
        })?;

        Ok((dyn_obj, name))
    }

    /// Apply an unstructured resource with server-side apply
    ///
    /// # Example
    ///
    /// ```ignore
    /// ctx.apply_dynamic(&Gvr::virtual_machine(), &json!({
    ///     "apiVersion": "kubevirt.io/v1",
    ///     "kind": "VirtualMachine",
    ///     "metadata": { "name": "fedora" },
    ///     "spec": { "runStrategy": "Always", "template": template }
    /// })).await?;
    /// ```
    pub async fn apply_dynamic(
        &self,
        gvr: &Gvr,
        obj: &serde_json::Value,
    ) -> Result<DynamicObject, ContextError> {
        let api = self.dynamic_api(gvr);
        let (dyn_obj, name) = self.dynamic_object(gvr, obj)?;

        let params = PatchParams::apply(&self.config.field_manager).force();
        let applied = api
            .patch(&name, &params, &Patch::Apply(&dyn_obj))
            .await
            .map_err(|e| ContextError::from_kube(&e, &gvr.kind, &name, ContextError::ApplyError))?;

        info!(
            namespace = %self.namespace,
            resource = %gvr.reference(&name),
            "Applied dynamic resource"
        );

        Ok(applied)
    }

    /// Create an unstructured resource; fails with `Conflict` if it exists
    pub async fn create_dynamic(
        &self,
        gvr: &Gvr,
        obj: &serde_json::Value,
    ) -> Result<DynamicObject, ContextError> {
        let api = self.dynamic_api(gvr);
        let (dyn_obj, name) = self.dynamic_object(gvr, obj)?;

        let created = api
            .create(&PostParams::default(), &dyn_obj)
            .await
            .map_err(|e| ContextError::from_kube(&e, &gvr.kind, &name, ContextError::CreateError))?;

        info!(
            namespace = %self.namespace,
            resource = %gvr.reference(&name),
            "Created dynamic resource"
        );

        Ok(created)
    }

    /// Get an unstructured resource
    ///
    /// ```ignore
    /// let vmi = ctx.get_dynamic(&Gvr::virtual_machine_instance(), "fedora").await?;
    /// let node = vmi.data["status"]["nodeName"].as_str();
    /// ```
    pub async fn get_dynamic(&self, gvr: &Gvr, name: &str) -> Result<DynamicObject, ContextError> {
        self.dynamic_api(gvr)
            .get(name)
            .await
            .map_err(|e| ContextError::from_kube(&e, &gvr.kind, name, ContextError::GetError))
    }

    /// Delete an unstructured resource
    pub async fn delete_dynamic(&self, gvr: &Gvr, name: &str) -> Result<(), ContextError> {
        self.dynamic_api(gvr)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| ContextError::from_kube(&e, &gvr.kind, name, ContextError::DeleteError))?;

        info!(
            namespace = %self.namespace,
            resource = %gvr.reference(name),
            "Deleted dynamic resource"
        );

        Ok(())
    }

    /// List unstructured resources
    pub async fn list_dynamic(&self, gvr: &Gvr) -> Result<Vec<DynamicObject>, ContextError> {
        let list = self
            .dynamic_api(gvr)
            .list(&ListParams::default())
            .await
            .map_err(|e| ContextError::ListError(format!("failed to list {}: {e}", gvr.resource)))?;

        Ok(list.items)
    }
}
