//! Prints the operator's CustomResourceDefinitions as a multi-document YAML stream.
//!
//! Usage: `cargo run --bin crdgen | kubectl apply -f -`

use kube::CustomResourceExt;
use open_liberty_operator::crd::{OpenLibertyApplication, OpenLibertyTrace};

fn main() -> anyhow::Result<()> {
    let crds = [OpenLibertyApplication::crd(), OpenLibertyTrace::crd()];
    let documents = crds
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    print!("{}", documents.join("---\n"));
    Ok(())
}
