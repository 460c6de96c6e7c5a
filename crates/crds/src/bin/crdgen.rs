//! Prints the CRD manifests as a multi-document YAML stream.
//!
//! `cargo run -p crds --bin crdgen > deploy/crds.yaml`

use crds::{Subnet, SubnetConnectionBindingMap, SubnetPort, SubnetSet, VPCNetworkConfiguration};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        SubnetSet::crd(),
        Subnet::crd(),
        SubnetPort::crd(),
        SubnetConnectionBindingMap::crd(),
        VPCNetworkConfiguration::crd(),
    ];

    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }

    Ok(())
}
