//! SharedKey and SharedKeyLite request signing.

use axum::http::{header, HeaderValue, Method};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use url::Url;

use crate::config::StorageAccount;
use crate::context::{format_http_date, UpstreamRequest};
use crate::error::{ErrorCode, StorageError, StorageResult};

type HmacSha256 = Hmac<Sha256>;

const MS_DATE: &str = "x-ms-date";
const MS_HEADER_PREFIX: &str = "x-ms-";

/// Which canonicalization a request is signed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningScheme {
    /// Versioned canonicalization, `Authorization: SharedKey`.
    SharedKey,
    /// Date and resource only, `Authorization: SharedKeyLite`.
    SharedKeyLite,
}

impl SigningScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningScheme::SharedKey => "SharedKey",
            SigningScheme::SharedKeyLite => "SharedKeyLite",
        }
    }

    /// Signs the request with this scheme at the current time.
    pub fn sign(
        &self,
        request: &mut UpstreamRequest,
        account: &StorageAccount,
    ) -> StorageResult<()> {
        self.sign_at(request, account, Utc::now())
    }

    /// Signs the request with this scheme at the given instant.
    pub fn sign_at(
        &self,
        request: &mut UpstreamRequest,
        account: &StorageAccount,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        match self {
            SigningScheme::SharedKey => sign_at(request, account, now),
            SigningScheme::SharedKeyLite => sign_lite_at(request, account, now),
        }
    }
}

/// Signs a request with SharedKey at the current time.
pub fn sign(request: &mut UpstreamRequest, account: &StorageAccount) -> StorageResult<()> {
    sign_at(request, account, Utc::now())
}

/// Signs a request with SharedKeyLite at the current time.
pub fn sign_lite(request: &mut UpstreamRequest, account: &StorageAccount) -> StorageResult<()> {
    sign_lite_at(request, account, Utc::now())
}

/// Stamps `x-ms-date` and sets a SharedKey `Authorization` header.
pub fn sign_at(
    request: &mut UpstreamRequest,
    account: &StorageAccount,
    now: DateTime<Utc>,
) -> StorageResult<()> {
    set_ms_date(request, now)?;
    let string_to_sign = build_string_to_sign(request, &account.name);
    let signature = compute_signature(&string_to_sign, &account.key)?;
    set_authorization(request, SigningScheme::SharedKey, &account.name, &signature)
}

/// Stamps `x-ms-date` and sets a SharedKeyLite `Authorization` header.
pub fn sign_lite_at(
    request: &mut UpstreamRequest,
    account: &StorageAccount,
    now: DateTime<Utc>,
) -> StorageResult<()> {
    set_ms_date(request, now)?;
    let string_to_sign = build_string_to_sign_lite(request, &account.name);
    let signature = compute_signature(&string_to_sign, &account.key)?;
    set_authorization(request, SigningScheme::SharedKeyLite, &account.name, &signature)
}

fn set_ms_date(request: &mut UpstreamRequest, now: DateTime<Utc>) -> StorageResult<()> {
    let date = HeaderValue::from_str(&format_http_date(&now))
        .map_err(|_| StorageError::new(ErrorCode::InternalError))?;
    // insert() drops every earlier value of the header
    request.headers.insert(MS_DATE, date);
    Ok(())
}

fn set_authorization(
    request: &mut UpstreamRequest,
    scheme: SigningScheme,
    account: &str,
    signature: &str,
) -> StorageResult<()> {
    let value = HeaderValue::from_str(&format!("{} {}:{}", scheme.as_str(), account, signature))
        .map_err(|_| StorageError::new(ErrorCode::InvalidHeaderValue))?;
    request.headers.insert(header::AUTHORIZATION, value);
    Ok(())
}

/// Newline-joined list of canonical elements.
struct CanonicalizedString {
    buf: String,
}

impl CanonicalizedString {
    fn new(first: &str) -> Self {
        Self {
            buf: first.to_string(),
        }
    }

    fn append(&mut self, element: &str) {
        self.buf.push('\n');
        self.buf.push_str(element);
    }

    fn into_string(self) -> String {
        self.buf
    }
}

/// Builds the SharedKey string-to-sign.
pub fn build_string_to_sign(request: &UpstreamRequest, account: &str) -> String {
    let mut canonical = CanonicalizedString::new(request.method.as_str());

    if request.body.is_none() {
        let content_length = match request.method {
            Method::PUT | Method::POST | Method::DELETE => "0",
            _ => "",
        };
        canonical.append(""); // Content-Encoding
        canonical.append(""); // Content-Language
        canonical.append(content_length);
        canonical.append(""); // Content-MD5
        canonical.append(""); // Content-Type
    } else {
        canonical.append(request.header_or_empty("content-encoding"));
        canonical.append(request.header_or_empty("content-language"));
        let length = request.content_length();
        canonical.append(&if length > 0 { length.to_string() } else { String::new() });
        canonical.append(request.header_or_empty("content-md5"));
        canonical.append(request.header_or_empty("content-type"));
    }

    // Date is carried by x-ms-date
    canonical.append("");

    for name in [
        "if-modified-since",
        "if-match",
        "if-none-match",
        "if-unmodified-since",
        "range",
    ] {
        canonical.append(request.header_or_empty(name));
    }

    for line in canonicalized_headers(request) {
        canonical.append(&line);
    }

    canonical.append(&canonicalized_resource(&request.url, account));
    canonical.into_string()
}

/// Builds the SharedKeyLite string-to-sign.
pub fn build_string_to_sign_lite(request: &UpstreamRequest, account: &str) -> String {
    format!(
        "{}\n{}",
        request.header_or_empty(MS_DATE),
        canonicalized_resource_lite(&request.url, account)
    )
}

/// Returns one `name:value` line per `x-ms-*` header, sorted by name.
pub fn canonicalized_headers(request: &UpstreamRequest) -> Vec<String> {
    let mut ms_headers: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, value) in request.headers.iter() {
        // Header names are stored lowercase
        if name.as_str().starts_with(MS_HEADER_PREFIX) {
            let value = String::from_utf8_lossy(value.as_bytes()).replace("\r\n", "");
            ms_headers.entry(name.as_str()).or_default().push(value);
        }
    }

    ms_headers
        .into_iter()
        .map(|(name, values)| format!("{}:{}", name, values.join(",")))
        .collect()
}

/// Builds the SharedKey canonicalized resource: account, path, then sorted query parameters.
pub fn canonicalized_resource(url: &Url, account: &str) -> String {
    let mut resource = format!("/{}{}", account, url.path());

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        params
            .entry(key.to_lowercase())
            .or_default()
            .push(value.into_owned());
    }

    for (key, mut values) in params {
        values.sort();
        resource.push('\n');
        resource.push_str(&key);
        resource.push(':');
        resource.push_str(&values.join(","));
    }

    resource.trim_matches('\n').to_string()
}

/// Builds the SharedKeyLite canonicalized resource: account, path and `comp` only.
pub fn canonicalized_resource_lite(url: &Url, account: &str) -> String {
    let mut resource = format!("/{}{}", account, url.path());
    if let Some((_, comp)) = url
        .query_pairs()
        .find(|(key, _)| key.eq_ignore_ascii_case("comp"))
    {
        resource.push_str("?comp=");
        resource.push_str(&comp);
    }
    resource
}

/// Computes the base64 HMAC-SHA256 of a string with a base64 account key.
pub fn compute_signature(string_to_sign: &str, account_key: &str) -> StorageResult<String> {
    let key_bytes = BASE64.decode(account_key).map_err(|_| {
        StorageError::with_message(ErrorCode::InvalidConfiguration, "Invalid account key encoding")
    })?;

    let mut mac = HmacSha256::new_from_slice(&key_bytes).map_err(|_| {
        StorageError::with_message(ErrorCode::InternalError, "Failed to create HMAC")
    })?;

    mac.update(string_to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}
