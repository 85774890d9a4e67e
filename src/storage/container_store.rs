//! Container operations consumed by the SAS issuer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::StorageResult;
use crate::models::{
    ContainerItem, ContainerPermissions, ContainerProperties, PublicAccess, SasPermissions,
};

/// Container lifecycle, permission and signature primitives of the blob service.
#[async_trait]
pub trait ContainerStore: Send + Sync {
    /// Absolute URI of a container.
    fn container_uri(&self, container: &str) -> String;

    /// Absolute URI of a blob.
    fn blob_uri(&self, container: &str, blob: &str) -> String;

    /// Creates a container. Returns `false` when it already existed.
    async fn create_container(
        &self,
        container: &str,
        metadata: &HashMap<String, String>,
        public_access: PublicAccess,
    ) -> StorageResult<bool>;

    async fn set_container_metadata(
        &self,
        container: &str,
        metadata: &HashMap<String, String>,
    ) -> StorageResult<()>;

    async fn get_container_permissions(
        &self,
        container: &str,
    ) -> StorageResult<ContainerPermissions>;

    /// Replaces the permission set, conditional on `if_match` when given.
    async fn set_container_permissions(
        &self,
        container: &str,
        permissions: &ContainerPermissions,
        if_match: Option<&str>,
    ) -> StorageResult<()>;

    async fn delete_container(&self, container: &str) -> StorageResult<()>;

    async fn get_container_properties(&self, container: &str) -> StorageResult<ContainerProperties>;

    /// Lists every container whose name starts with `prefix`.
    async fn list_containers(&self, prefix: Option<&str>) -> StorageResult<Vec<ContainerItem>>;

    /// Mints a container SAS query string.
    fn container_sas(
        &self,
        container: &str,
        permissions: SasPermissions,
        expiry: DateTime<Utc>,
    ) -> StorageResult<String>;

    /// Mints a blob SAS query string scoped to a stored access policy.
    fn blob_sas(&self, container: &str, blob: &str, policy_id: &str) -> StorageResult<String>;
}
