use harbor_cluster::api::v1beta1::{harbor::Harbor, harborcluster::HarborCluster};
use kube::CustomResourceExt as _;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&HarborCluster::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&Harbor::crd())?);
    Ok(())
}
