//! CRD generation and installation
//!
//! The operator installs its own CRDs on startup with server-side apply so
//! the installed schema always matches the running binary.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use apollo_common::crd::{Apollo, ApolloEnvironment, ApolloPortal};
use apollo_common::FIELD_MANAGER;

/// CRD definition with its cluster-scoped name
struct CrdDef {
    name: &'static str,
    crd: CustomResourceDefinition,
}

fn operator_crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: ApolloEnvironment::crd_name(),
            crd: ApolloEnvironment::crd(),
        },
        CrdDef {
            name: ApolloPortal::crd_name(),
            crd: ApolloPortal::crd(),
        },
        CrdDef {
            name: Apollo::crd_name(),
            crd: Apollo::crd(),
        },
    ]
}

/// All CRDs as one multi-document YAML stream
pub fn crds_yaml() -> anyhow::Result<String> {
    let docs = operator_crds()
        .iter()
        .map(|def| {
            serde_yaml::to_string(&def.crd)
                .map_err(|e| anyhow::anyhow!("failed to serialize {} CRD: {}", def.name, e))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(docs.join("---\n"))
}

/// Install or update every CRD the controllers watch
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for def in operator_crds() {
        tracing::info!(crd = def.name, "installing CRD");
        crds.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }

    tracing::info!("CRDs installed/updated");
    Ok(())
}
