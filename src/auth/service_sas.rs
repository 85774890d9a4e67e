//! Service SAS minting for containers and blobs.

use chrono::{DateTime, Utc};
use url::form_urlencoded;

use crate::config::StorageAccount;
use crate::error::StorageResult;
use crate::models::SasPermissions;

use super::shared_key::compute_signature;

/// Service version the signatures are computed for.
pub const SERVICE_SAS_VERSION: &str = "2020-12-06";

/// Resource a service SAS is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SasResource {
    Container { container: String },
    Blob { container: String, blob: String },
}

impl SasResource {
    fn signed_resource(&self) -> &'static str {
        match self {
            SasResource::Container { .. } => "c",
            SasResource::Blob { .. } => "b",
        }
    }

    fn canonicalized_resource(&self, account: &str) -> String {
        match self {
            SasResource::Container { container } => format!("/blob/{}/{}", account, container),
            SasResource::Blob { container, blob } => {
                format!("/blob/{}/{}/{}", account, container, blob)
            }
        }
    }
}

/// A service shared access signature under construction.
///
/// Permissions and expiry may be left out when a stored access policy named
/// by [`ServiceSas::with_identifier`] supplies them.
#[derive(Debug, Clone)]
pub struct ServiceSas {
    resource: SasResource,
    permissions: Option<SasPermissions>,
    expiry: Option<DateTime<Utc>>,
    identifier: Option<String>,
    version: String,
}

impl ServiceSas {
    pub fn container(container: impl Into<String>) -> Self {
        Self::new(SasResource::Container {
            container: container.into(),
        })
    }

    pub fn blob(container: impl Into<String>, blob: impl Into<String>) -> Self {
        Self::new(SasResource::Blob {
            container: container.into(),
            blob: blob.into(),
        })
    }

    fn new(resource: SasResource) -> Self {
        Self {
            resource,
            permissions: None,
            expiry: None,
            identifier: None,
            version: SERVICE_SAS_VERSION.to_string(),
        }
    }

    pub fn with_permissions(mut self, permissions: SasPermissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Scopes the signature to a stored access policy.
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    fn string_to_sign(&self, account: &str) -> String {
        [
            self.permissions.map(|p| p.as_string()).unwrap_or_default(),
            String::new(), // signed start
            self.expiry.as_ref().map(format_sas_datetime).unwrap_or_default(),
            self.resource.canonicalized_resource(account),
            self.identifier.clone().unwrap_or_default(),
            String::new(), // signed IP
            String::new(), // signed protocol
            self.version.clone(),
            self.resource.signed_resource().to_string(),
            String::new(), // snapshot time
            String::new(), // encryption scope
            String::new(), // rscc
            String::new(), // rscd
            String::new(), // rsce
            String::new(), // rscl
            String::new(), // rsct
        ]
        .join("\n")
    }

    /// Signs with the account key and returns the SAS query string without a leading `?`.
    pub fn token(&self, account: &StorageAccount) -> StorageResult<String> {
        let signature = compute_signature(&self.string_to_sign(&account.name), &account.key)?;

        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("sv", &self.version);
        query.append_pair("sr", self.resource.signed_resource());
        if let Some(expiry) = &self.expiry {
            query.append_pair("se", &format_sas_datetime(expiry));
        }
        if let Some(permissions) = &self.permissions {
            query.append_pair("sp", &permissions.as_string());
        }
        if let Some(identifier) = &self.identifier {
            query.append_pair("si", identifier);
        }
        query.append_pair("sig", &signature);
        Ok(query.finish())
    }
}

/// Formats a datetime for a SAS token.
pub fn format_sas_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_container_sas_token() {
        let expiry = Utc.with_ymd_and_hms(2024, 3, 5, 7, 23, 9).unwrap();
        let token = ServiceSas::container("photos")
            .with_permissions(SasPermissions::ALL)
            .with_expiry(expiry)
            .token(&StorageAccount::development())
            .unwrap();

        assert_eq!(
            token,
            "sv=2020-12-06&sr=c&se=2024-03-05T07%3A23%3A09Z&sp=rwdl&sig=RZSJhtC2nJ1miKCetkC9GehsOKedzxzJ%2B4okl%2FUy0H4%3D"
        );
    }

    #[test]
    fn test_blob_sas_with_stored_policy() {
        let token = ServiceSas::blob("photos", "2024/cat.jpg")
            .with_identifier("readonly")
            .token(&StorageAccount::development())
            .unwrap();

        assert_eq!(
            token,
            "sv=2020-12-06&sr=b&si=readonly&sig=LJSONJDC1eTNKJEn6xt04w%2BWUckAGn9OlLly6f1m9uw%3D"
        );
    }
}
