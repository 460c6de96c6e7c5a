//! Backend tags for SubnetSet-owned Subnets.
//!
//! Ownership of a backend Subnet is recorded only in its tags, so generation
//! never truncates or drops anything: a tag that cannot be represented, or a
//! set larger than the backend limit, is an error.

use crate::error::ControllerError;
use crds::SubnetSet;
use kube::ResourceExt;
use vpc_client::{Tag, VpcSubnet};

/// Cluster that owns the resource
pub const TAG_SCOPE_CLUSTER: &str = "cluster";
/// Namespace of the owning SubnetSet
pub const TAG_SCOPE_NAMESPACE: &str = "namespace";
/// Name of the owning SubnetSet
pub const TAG_SCOPE_SUBNETSET_NAME: &str = "subnetset_cr_name";
/// UID of the owning SubnetSet
pub const TAG_SCOPE_SUBNETSET_UID: &str = "subnetset_cr_uid";
/// UID of the Subnet object a pre-created backend Subnet was realized for
pub const TAG_SCOPE_SUBNET_UID: &str = "subnet_cr_uid";
/// Prefix of scopes copied from SubnetSet labels
pub const LABEL_SCOPE_PREFIX: &str = "label/";

const MAX_SCOPE_LEN: usize = 128;
const MAX_TAG_LEN: usize = 256;

/// Builds the tags of every backend Subnet owned by `subnet_set`.
///
/// Fixed tags come first, then one `label/<key>` tag per label in key order.
pub fn build_subnet_set_tags(
    cluster: &str,
    subnet_set: &SubnetSet,
    max_tags: usize,
) -> Result<Vec<Tag>, ControllerError> {
    let namespace = subnet_set
        .namespace()
        .ok_or_else(|| ControllerError::TagGeneration("SubnetSet has no namespace".to_string()))?;
    let uid = subnet_set
        .uid()
        .ok_or_else(|| ControllerError::TagGeneration("SubnetSet has no uid".to_string()))?;

    let mut tags = vec![
        Tag::new(TAG_SCOPE_CLUSTER, cluster),
        Tag::new(TAG_SCOPE_NAMESPACE, namespace),
        Tag::new(TAG_SCOPE_SUBNETSET_NAME, subnet_set.name_any()),
        Tag::new(TAG_SCOPE_SUBNETSET_UID, uid),
    ];
    for (key, value) in subnet_set.labels() {
        tags.push(Tag::new(format!("{}{}", LABEL_SCOPE_PREFIX, key), value.as_str()));
    }

    if let Some(bad) = tags
        .iter()
        .find(|t| t.scope.len() > MAX_SCOPE_LEN || t.tag.len() > MAX_TAG_LEN)
    {
        return Err(ControllerError::TagGeneration(format!(
            "tag {} exceeds the backend length limits ({}/{} characters)",
            bad.scope, MAX_SCOPE_LEN, MAX_TAG_LEN
        )));
    }
    if tags.len() > max_tags {
        return Err(ControllerError::TagOverflow {
            count: tags.len(),
            max: max_tags,
        });
    }
    Ok(tags)
}

/// UID of the SubnetSet owning `subnet`, if any
pub fn owner_uid(subnet: &VpcSubnet) -> Option<&str> {
    subnet.tag_value(TAG_SCOPE_SUBNETSET_UID)
}

/// True when `current` and `wanted` hold the same tags in any order
pub fn same_tags(current: &[Tag], wanted: &[Tag]) -> bool {
    if current.len() != wanted.len() {
        return false;
    }
    let mut a: Vec<&Tag> = current.iter().collect();
    let mut b: Vec<&Tag> = wanted.iter().collect();
    a.sort_by(|x, y| (&x.scope, &x.tag).cmp(&(&y.scope, &y.tag)));
    b.sort_by(|x, y| (&x.scope, &x.tag).cmp(&(&y.scope, &y.tag)));
    a == b
}
