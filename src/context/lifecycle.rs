use super::{Context, ContextError};
use crate::conditions::namespace_active;
use crate::config::SuiteConfig;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::Client;
use std::sync::Arc;
use tracing::{info, warn};

/// Label set on every namespace created by [`Context::new`]
pub const TEST_NAMESPACE_LABEL: &str = "virtwait.io/test";

impl Context {
    /// Create a context with an isolated namespace, configured from the environment
    ///
    /// See [`SuiteConfig::from_env`] for the recognised variables.
    pub async fn new() -> Result<Self, ContextError> {
        Self::with_config(SuiteConfig::from_env()?).await
    }

    /// Create a context with an isolated namespace
    ///
    /// The namespace is named `{namespace_prefix}-{random}`, labelled
    /// `virtwait.io/test=true`, and is `Active` when this returns.
    pub async fn with_config(config: SuiteConfig) -> Result<Self, ContextError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ContextError::ClientError(e.to_string()))?;

        Self::create_in(client, config).await
    }

    /// Create an isolated namespace through an existing client
    ///
    /// If the namespace never turns `Active` it is deleted again before the
    /// error is returned.
    pub async fn create_in(client: Client, config: SuiteConfig) -> Result<Self, ContextError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let namespace = format!("{}-{}", config.namespace_prefix, &id[..8]);

        let namespaces: Api<Namespace> = Api::all(client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.clone()),
                labels: Some(
                    [(TEST_NAMESPACE_LABEL.to_string(), "true".to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };

        namespaces
            .create(&PostParams::default(), &ns)
            .await
            .map_err(|e| ContextError::NamespaceError(e.to_string()))?;

        info!(namespace = %namespace, "Created test namespace");

        let ctx = Self::from_client(client, namespace, config);
        let timeout = ctx.config.wait_timeout;
        if let Err(e) = ctx
            .wait_for_cluster::<Namespace, _>(&ctx.namespace, namespace_active(), timeout)
            .await
        {
            if let Err(cleanup) = ctx.cleanup().await {
                warn!(namespace = %ctx.namespace, error = %cleanup, "Cleanup after inactive namespace also failed");
            }
            return Err(e);
        }

        Ok(ctx)
    }

    /// Attach to an existing namespace
    ///
    /// Nothing is created; [`cleanup`](Self::cleanup) still deletes the namespace.
    pub fn from_client(client: Client, namespace: impl Into<String>, config: SuiteConfig) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            config: Arc::new(config),
        }
    }

    /// Delete the test namespace and wait until it is gone
    ///
    /// A namespace that is already gone is not an error.
    pub async fn cleanup(&self) -> Result<(), ContextError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());

        match namespaces
            .delete(&self.namespace, &DeleteParams::foreground())
            .await
        {
            Ok(_) => {}
            Err(e) if crate::classify::is_not_found(&e) => return Ok(()),
            Err(e) => return Err(ContextError::CleanupError(e.to_string())),
        }

        self.wait_deleted_cluster::<Namespace>(&self.namespace, self.config.delete_timeout)
            .await?;

        info!(namespace = %self.namespace, "Deleted test namespace");

        Ok(())
    }
}
