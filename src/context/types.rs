/// Resource kinds understood by `wait_ready`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Deployment,
    Pod,
    Service,
    StatefulSet,
    DaemonSet,
    VirtualMachine,
    VirtualMachineInstance,
    DataVolume,
}

/// `GroupVersionResource` identifies a resource type for the dynamic client
///
/// Used for CRDs (KubeVirt, CDI, Multus, nmstate) without compile-time types.
///
/// # Example
///
/// ```ignore
/// let gvr = Gvr::network_attachment_definition();
///
/// ctx.apply_dynamic(&gvr, &json!({
///     "apiVersion": "k8s.cni.cncf.io/v1",
///     "kind": "NetworkAttachmentDefinition",
///     "metadata": { "name": "br1" },
///     "spec": { "config": bridge_config }
/// })).await?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gvr {
    /// API group (e.g., "kubevirt.io", "" for core)
    pub group: String,
    /// API version (e.g., "v1", "v1beta1")
    pub version: String,
    /// Resource name (plural, e.g., "virtualmachines")
    pub resource: String,
    /// Kind name (singular, e.g., "`VirtualMachine`")
    pub kind: String,
    /// Whether objects live in a namespace
    pub namespaced: bool,
}

impl Gvr {
    /// Create a namespaced `GroupVersionResource`
    #[must_use]
    pub fn new(group: &str, version: &str, resource: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
            kind: kind.to_string(),
            namespaced: true,
        }
    }

    /// Mark the resource as cluster-scoped
    #[must_use]
    pub fn cluster_scoped(mut self) -> Self {
        self.namespaced = false;
        self
    }

    /// KubeVirt: `VirtualMachine`
    #[must_use]
    pub fn virtual_machine() -> Self {
        Self::new("kubevirt.io", "v1", "virtualmachines", "VirtualMachine")
    }

    /// KubeVirt: `VirtualMachineInstance`
    #[must_use]
    pub fn virtual_machine_instance() -> Self {
        Self::new(
            "kubevirt.io",
            "v1",
            "virtualmachineinstances",
            "VirtualMachineInstance",
        )
    }

    /// KubeVirt: `VirtualMachineInstanceMigration`
    #[must_use]
    pub fn virtual_machine_instance_migration() -> Self {
        Self::new(
            "kubevirt.io",
            "v1",
            "virtualmachineinstancemigrations",
            "VirtualMachineInstanceMigration",
        )
    }

    /// CDI: `DataVolume`
    #[must_use]
    pub fn data_volume() -> Self {
        Self::new("cdi.kubevirt.io", "v1beta1", "datavolumes", "DataVolume")
    }

    /// Multus: `NetworkAttachmentDefinition`
    #[must_use]
    pub fn network_attachment_definition() -> Self {
        Self::new(
            "k8s.cni.cncf.io",
            "v1",
            "network-attachment-definitions",
            "NetworkAttachmentDefinition",
        )
    }

    /// nmstate: `NodeNetworkConfigurationPolicy` (cluster-scoped)
    #[must_use]
    pub fn node_network_configuration_policy() -> Self {
        Self::new(
            "nmstate.io",
            "v1",
            "nodenetworkconfigurationpolicies",
            "NodeNetworkConfigurationPolicy",
        )
        .cluster_scoped()
    }

    /// Short reference used in logs, e.g. `virtualmachines/fedora`
    pub fn reference(&self, name: &str) -> String {
        format!("{}/{name}", self.resource)
    }

    /// Convert to kube `ApiResource`
    pub(crate) fn to_api_resource(&self) -> kube::core::ApiResource {
        kube::core::ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: if self.group.is_empty() {
                self.version.clone()
            } else {
                format!("{}/{}", self.group, self.version)
            },
            kind: self.kind.clone(),
            plural: self.resource.clone(),
        }
    }
}
