//! Container store backed by the blob service REST API.

use async_trait::async_trait;
use axum::http::{
    header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_MATCH, LAST_MODIFIED},
    HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::auth::{sign, ServiceSas};
use crate::config::{Config, StorageAccount};
use crate::context::{metadata_from_headers, parse_http_date, UpstreamRequest};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{
    ContainerItem, ContainerPermissions, ContainerProperties, PublicAccess, SasPermissions,
};
use crate::proxy::{UpstreamClient, UpstreamResponse};
use crate::xml::{
    parse_container_enumeration, parse_signed_identifiers, parse_upstream_error,
    serialize_signed_identifiers,
};

/// Characters escaped in blob names; `/` separates virtual directories.
const BLOB_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

const PUBLIC_ACCESS_HEADER: &str = "x-ms-blob-public-access";

/// Container store that talks to the account's blob endpoint.
pub struct RestContainerStore {
    account: StorageAccount,
    api_version: String,
    client: Arc<dyn UpstreamClient>,
}

impl RestContainerStore {
    pub fn new(config: &Config, client: Arc<dyn UpstreamClient>) -> Self {
        Self {
            account: config.account.clone(),
            api_version: config.api_version.clone(),
            client,
        }
    }

    fn endpoint(&self) -> &str {
        self.account.blob_endpoint.trim_end_matches('/')
    }

    fn container_url(&self, container: &str, comp: Option<&str>) -> StorageResult<Url> {
        let mut url = parse_url(&format!("{}/{}", self.endpoint(), container))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("restype", "container");
            if let Some(comp) = comp {
                query.append_pair("comp", comp);
            }
        }
        Ok(url)
    }

    /// Signs and sends a call, turning non-success statuses into errors.
    async fn execute(&self, mut request: UpstreamRequest) -> StorageResult<UpstreamResponse> {
        request
            .headers
            .insert("x-ms-version", header_value(&self.api_version)?);
        if request.body.is_none()
            && matches!(request.method, Method::PUT | Method::POST | Method::DELETE)
        {
            request.headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        }
        sign(&mut request, &self.account)?;

        debug!("{} {}", request.method, request.url);
        let response = self.client.send(request).await?;

        if response.status.is_success() {
            Ok(response)
        } else {
            Err(upstream_error(&response))
        }
    }
}

#[async_trait]
impl super::ContainerStore for RestContainerStore {
    fn container_uri(&self, container: &str) -> String {
        format!("{}/{}", self.endpoint(), container)
    }

    fn blob_uri(&self, container: &str, blob: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint(),
            container,
            utf8_percent_encode(blob.trim_start_matches('/'), BLOB_NAME)
        )
    }

    async fn create_container(
        &self,
        container: &str,
        metadata: &HashMap<String, String>,
        public_access: PublicAccess,
    ) -> StorageResult<bool> {
        let mut request = UpstreamRequest::new(Method::PUT, self.container_url(container, None)?);
        insert_metadata(&mut request.headers, metadata)?;
        if let Some(access) = public_access.header_value() {
            request
                .headers
                .insert(PUBLIC_ACCESS_HEADER, HeaderValue::from_static(access));
        }

        match self.execute(request).await {
            Ok(_) => Ok(true),
            Err(e) if e.status == StatusCode::CONFLICT
                && e.upstream_code.as_deref() == Some("ContainerAlreadyExists") =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn set_container_metadata(
        &self,
        container: &str,
        metadata: &HashMap<String, String>,
    ) -> StorageResult<()> {
        let mut request =
            UpstreamRequest::new(Method::PUT, self.container_url(container, Some("metadata"))?);
        insert_metadata(&mut request.headers, metadata)?;
        self.execute(request).await?;
        Ok(())
    }

    async fn get_container_permissions(
        &self,
        container: &str,
    ) -> StorageResult<ContainerPermissions> {
        let request =
            UpstreamRequest::new(Method::GET, self.container_url(container, Some("acl"))?);
        let response = self.execute(request).await?;

        let body = String::from_utf8_lossy(&response.body);
        let signed_identifiers = if body.trim().is_empty() {
            Vec::new()
        } else {
            parse_signed_identifiers(&body)?
        };

        Ok(ContainerPermissions {
            public_access: header_str(&response.headers, PUBLIC_ACCESS_HEADER)
                .and_then(PublicAccess::from_str)
                .unwrap_or_default(),
            signed_identifiers,
            etag: header_str(&response.headers, ETAG.as_str()).map(str::to_string),
        })
    }

    async fn set_container_permissions(
        &self,
        container: &str,
        permissions: &ContainerPermissions,
        if_match: Option<&str>,
    ) -> StorageResult<()> {
        let mut request =
            UpstreamRequest::new(Method::PUT, self.container_url(container, Some("acl"))?);
        if let Some(access) = permissions.public_access.header_value() {
            request
                .headers
                .insert(PUBLIC_ACCESS_HEADER, HeaderValue::from_static(access));
        }
        if let Some(etag) = if_match {
            request.headers.insert(IF_MATCH, header_value(etag)?);
        }
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
        request.body = Some(Bytes::from(serialize_signed_identifiers(
            &permissions.signed_identifiers,
        )));

        self.execute(request).await?;
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> StorageResult<()> {
        let request = UpstreamRequest::new(Method::DELETE, self.container_url(container, None)?);
        self.execute(request).await?;
        Ok(())
    }

    async fn get_container_properties(
        &self,
        container: &str,
    ) -> StorageResult<ContainerProperties> {
        let request = UpstreamRequest::new(Method::HEAD, self.container_url(container, None)?);
        let response = self.execute(request).await?;

        Ok(ContainerProperties {
            etag: header_str(&response.headers, ETAG.as_str()).map(str::to_string),
            last_modified: header_str(&response.headers, LAST_MODIFIED.as_str())
                .and_then(parse_http_date),
            metadata: metadata_from_headers(&response.headers),
        })
    }

    async fn list_containers(&self, prefix: Option<&str>) -> StorageResult<Vec<ContainerItem>> {
        let mut items = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = parse_url(&format!("{}/", self.endpoint()))?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("comp", "list");
                if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
                    query.append_pair("prefix", prefix);
                }
                if let Some(marker) = &marker {
                    query.append_pair("marker", marker);
                }
            }

            let response = self.execute(UpstreamRequest::new(Method::GET, url)).await?;
            let page = parse_container_enumeration(&String::from_utf8_lossy(&response.body))?;

            if let Some(containers) = &page.containers {
                for entry in &containers.items {
                    items.push(ContainerItem {
                        uri: self.container_uri(&entry.name),
                        name: entry.name.clone(),
                    });
                }
            }

            match page.next_marker() {
                Some(next) => marker = Some(next.to_string()),
                None => break,
            }
        }

        Ok(items)
    }

    fn container_sas(
        &self,
        container: &str,
        permissions: SasPermissions,
        expiry: DateTime<Utc>,
    ) -> StorageResult<String> {
        ServiceSas::container(container)
            .with_permissions(permissions)
            .with_expiry(expiry)
            .token(&self.account)
    }

    fn blob_sas(&self, container: &str, blob: &str, policy_id: &str) -> StorageResult<String> {
        ServiceSas::blob(container, blob.trim_start_matches('/'))
            .with_identifier(policy_id)
            .token(&self.account)
    }
}

/// Builds the error for a failed storage call from its body or headers.
fn upstream_error(response: &UpstreamResponse) -> StorageError {
    let body = parse_upstream_error(&String::from_utf8_lossy(&response.body));
    let code = body
        .code
        .or_else(|| header_str(&response.headers, "x-ms-error-code").map(str::to_string));
    let message = body.message.unwrap_or_else(|| {
        response
            .status
            .canonical_reason()
            .unwrap_or("The storage service rejected the request.")
            .to_string()
    });
    StorageError::upstream(response.status, code, message)
}

fn insert_metadata(
    headers: &mut HeaderMap,
    metadata: &HashMap<String, String>,
) -> StorageResult<()> {
    for (key, value) in metadata {
        let name = HeaderName::from_bytes(format!("x-ms-meta-{}", key).as_bytes()).map_err(|_| {
            StorageError::with_message(
                ErrorCode::InvalidHeaderValue,
                format!("Invalid metadata name '{}'", key),
            )
        })?;
        headers.insert(name, header_value(value)?);
    }
    Ok(())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_value(value: &str) -> StorageResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| {
        StorageError::with_message(
            ErrorCode::InvalidHeaderValue,
            format!("Invalid header value '{}'", value),
        )
    })
}

fn parse_url(s: &str) -> StorageResult<Url> {
    Url::parse(s).map_err(|e| {
        StorageError::with_message(
            ErrorCode::InvalidUri,
            format!("Invalid storage URI '{}': {}", s, e),
        )
    })
}
