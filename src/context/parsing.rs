use super::{ContextError, ResourceKind};

/// Extract just the resource name from either "name" or "kind/name" format
///
/// - `"fedora"` → `"fedora"`
/// - `"vm/fedora"` → `"fedora"`
#[must_use]
pub fn extract_resource_name(reference: &str) -> &str {
    reference.split('/').next_back().unwrap_or(reference)
}

/// Parse a resource reference like "vm/fedora" into (kind, name)
///
/// Supports kubectl-style aliases:
/// - `deployment`, `deploy` → Deployment
/// - `pod`, `po` → Pod
/// - `service`, `svc` → Service
/// - `statefulset`, `sts` → `StatefulSet`
/// - `daemonset`, `ds` → `DaemonSet`
/// - `virtualmachine`, `vm` → `VirtualMachine`
/// - `virtualmachineinstance`, `vmi` → `VirtualMachineInstance`
/// - `datavolume`, `dv` → `DataVolume`
///
/// # Errors
///
/// Returns `ContextError::InvalidResourceRef` if the reference format is invalid.
pub fn parse_resource_ref(reference: &str) -> Result<(ResourceKind, &str), ContextError> {
    let Some((kind_str, name)) = reference.split_once('/') else {
        return Err(ContextError::InvalidResourceRef(format!(
            "expected 'kind/name', got '{reference}'"
        )));
    };

    if name.is_empty() {
        return Err(ContextError::InvalidResourceRef(format!(
            "resource name cannot be empty in '{reference}'"
        )));
    }

    let kind = match kind_str.to_lowercase().as_str() {
        "deployment" | "deploy" => ResourceKind::Deployment,
        "pod" | "po" => ResourceKind::Pod,
        "service" | "svc" => ResourceKind::Service,
        "statefulset" | "sts" => ResourceKind::StatefulSet,
        "daemonset" | "ds" => ResourceKind::DaemonSet,
        "virtualmachine" | "vm" => ResourceKind::VirtualMachine,
        "virtualmachineinstance" | "vmi" => ResourceKind::VirtualMachineInstance,
        "datavolume" | "dv" => ResourceKind::DataVolume,
        _ => {
            return Err(ContextError::InvalidResourceRef(format!(
                "unknown resource kind '{kind_str}' in '{reference}'"
            )))
        }
    };

    Ok((kind, name))
}
