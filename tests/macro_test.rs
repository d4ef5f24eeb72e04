//! Integration tests using the #[virtwait::test] macro

use k8s_openapi::api::core::v1::ConfigMap;
use serde_json::json;
#[allow(unused_imports)] // Used in macro-expanded function signatures
use virtwait::Context;
use virtwait::Gvr;

fn config_map(name: &str) -> ConfigMap {
    ConfigMap {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        data: Some(
            [("key".to_string(), "value".to_string())]
                .into_iter()
                .collect(),
        ),
        ..Default::default()
    }
}

/// The macro creates an isolated namespace, injects it as `ctx` and deletes
/// it when the test passes
#[virtwait::test]
#[ignore] // Requires real cluster
async fn test_macro_creates_configmap(ctx: Context) {
    let created = ctx
        .apply(&config_map("macro-test"))
        .await
        .expect("Should apply ConfigMap");

    assert_eq!(
        created.metadata.namespace,
        Some(ctx.namespace.clone()),
        "Resource should be in test namespace"
    );

    let fetched: ConfigMap = ctx.get("macro-test").await.expect("Should exist");
    assert_eq!(fetched.data, created.data);
}

/// Result-returning bodies can use `?`
#[virtwait::test]
#[ignore] // Requires real cluster
async fn test_macro_with_result(ctx: Context) -> Result<(), Box<dyn std::error::Error>> {
    ctx.apply(&config_map("with-result")).await?;
    ctx.delete::<ConfigMap>("with-result").await?;
    ctx.wait_deleted::<ConfigMap>("with-result").await?;
    Ok(())
}

/// Requires KubeVirt installed in the cluster
#[virtwait::test]
#[ignore] // Requires real cluster
async fn test_macro_vm_lifecycle(ctx: Context) {
    let vm = json!({
        "apiVersion": "kubevirt.io/v1",
        "kind": "VirtualMachine",
        "metadata": { "name": "cirros" },
        "spec": {
            "running": true,
            "template": {
                "spec": {
                    "domain": {
                        "devices": { "disks": [{ "name": "root", "disk": { "bus": "virtio" } }] },
                        "resources": { "requests": { "memory": "128Mi" } }
                    },
                    "volumes": [{
                        "name": "root",
                        "containerDisk": { "image": "quay.io/kubevirt/cirros-container-disk-demo" }
                    }]
                }
            }
        }
    });

    ctx.apply_dynamic(&Gvr::virtual_machine(), &vm)
        .await
        .expect("Should apply VirtualMachine");
    ctx.wait_ready("vm/cirros").await.expect("VM should become ready");
    ctx.wait_ready("vmi/cirros").await.expect("VMI should become ready");
}

/// Test without ctx parameter - should just work as regular async test
#[virtwait::test]
async fn test_macro_without_ctx() {
    let x = 1 + 1;
    assert_eq!(x, 2);
}
