//! Proc macros for virtwait
//!
//! Provides the `#[virtwait::test]` attribute macro for KubeVirt end-to-end tests.

use proc_macro::TokenStream;
use quote::quote;
use syn::{FnArg, ItemFn, Pat, PatType, ReturnType};

/// Attribute macro for cluster tests
///
/// Creates a `Context` with an isolated namespace and injects it as `ctx`.
///
/// # Example
///
/// ```ignore
/// use virtwait::{Context, Gvr};
///
/// #[virtwait::test]
/// async fn test_vm_starts(ctx: Context) {
///     ctx.apply_dynamic(&Gvr::virtual_machine(), &vm).await.unwrap();
///     ctx.wait_ready("vm/fedora").await.unwrap();
/// }
/// ```
///
/// # With Result Return Type
///
/// ```ignore
/// #[virtwait::test]
/// async fn test_with_result(ctx: Context) -> Result<(), Box<dyn std::error::Error>> {
///     ctx.wait_ready("dv/fedora-disk").await?;
///     Ok(())
/// }
/// ```
///
/// # What it does
///
/// 1. Build a `Context` from the environment (`SuiteConfig::from_env`)
/// 2. Run the body, catching panics and `Err` returns
/// 3. On failure: print VM states, pod logs and events
/// 4. Delete the namespace unless `VIRTWAIT_KEEP_ALL` is set, or the test
///    failed and `VIRTWAIT_KEEP_ON_FAILURE` is set
///
/// Functions without a `ctx` parameter become plain `#[tokio::test]`s.
#[proc_macro_attribute]
pub fn test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = syn::parse_macro_input!(item as ItemFn);
    test_impl(&input_fn).into()
}

/// Check if a function has a parameter named "ctx"
fn has_ctx_param(input_fn: &ItemFn) -> bool {
    input_fn.sig.inputs.iter().any(|arg| {
        if let FnArg::Typed(PatType { pat, .. }) = arg {
            if let Pat::Ident(ident) = pat.as_ref() {
                return ident.ident == "ctx";
            }
        }
        false
    })
}

/// Inner implementation that works with `proc_macro2` types for testability
fn test_impl(input_fn: &ItemFn) -> proc_macro2::TokenStream {
    let fn_name = &input_fn.sig.ident;
    let fn_block = &input_fn.block;
    let fn_vis = &input_fn.vis;
    let fn_attrs = &input_fn.attrs;

    if !has_ctx_param(input_fn) {
        return quote! {
            #(#fn_attrs)*
            #[tokio::test]
            #fn_vis async fn #fn_name() {
                #fn_block
            }
        };
    }

    // Both shapes evaluate to Result<(), String>; Err carries the failure text
    let test_execution = if let ReturnType::Type(_, ret_ty) = &input_fn.sig.output {
        quote! {
            let result: #ret_ty = (async #fn_block).await;
            result.map_err(|e| e.to_string())
        }
    } else {
        quote! {
            (async #fn_block).await;
            Ok::<(), String>(())
        }
    };

    quote! {
        #(#fn_attrs)*
        #[tokio::test]
        #fn_vis async fn #fn_name() {
            use futures::FutureExt;
            use std::panic::AssertUnwindSafe;

            virtwait::telemetry::init_logging();

            let ctx = virtwait::Context::new()
                .await
                .unwrap_or_else(|e| panic!("Failed to create Context: {}", e));
            let namespace = ctx.namespace.clone();

            let outcome = AssertUnwindSafe({
                let ctx = ctx.clone();
                async move { #test_execution }
            })
            .catch_unwind()
            .await;

            let passed = matches!(outcome, Ok(Ok(())));
            let cleanup = ctx.config().should_cleanup(passed);

            if !passed {
                let mut diag = ctx.collect_diagnostics().await;
                diag.namespace_kept = !cleanup;
                eprintln!("{}", diag);
            }

            if cleanup {
                if let Err(e) = ctx.cleanup().await {
                    eprintln!("[virtwait] Warning: cleanup of {} failed: {}", namespace, e);
                }
            } else {
                eprintln!("[virtwait] Keeping namespace: {}", namespace);
            }

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(message)) => panic!("{}", message),
                Err(panic_info) => std::panic::resume_unwind(panic_info),
            }
        }
    }
}
