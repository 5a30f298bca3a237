//! Well-known names shared with the cluster and the legacy in-tree plugin.
//!
//! Annotation keys are part of the compatibility surface and must match the
//! keys written by the Kubernetes controllers exactly.

/// Name under which this CSI driver registers with the cluster
pub const CSI_DRIVER_NAME: &str = "csi.vsphere.vmware.com";

/// Name of the legacy in-tree volume plugin
pub const IN_TREE_PLUGIN_NAME: &str = "kubernetes.io/vsphere-volume";

/// Set on claims and volumes handed over from the in-tree plugin
pub const ANN_MIGRATED_TO: &str = "pv.kubernetes.io/migrated-to";

/// Provisioner that created the volume for a claim
pub const ANN_STORAGE_PROVISIONER: &str = "volume.beta.kubernetes.io/storage-provisioner";

/// Provisioner that dynamically created a volume
pub const ANN_DYNAMICALLY_PROVISIONED: &str = "pv.kubernetes.io/provisioned-by";

/// Claim annotation carrying the storage class before `spec.storageClassName`
pub const ANN_STORAGE_CLASS: &str = "volume.beta.kubernetes.io/storage-class";

/// Feature gate for treating legacy volumes as eligible for sync
pub const FEATURE_CSI_MIGRATION: &str = "csi-migration";

/// Feature gate for the volume health path
pub const FEATURE_VOLUME_HEALTH: &str = "volume-health";

/// Page size used for backend catalog queries
pub const QUERY_VOLUME_LIMIT: u64 = 1000;

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "volume-metadata-syncer";
