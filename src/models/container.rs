//! Container data models.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Public access level for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublicAccess {
    #[default]
    Off,
    Container,
    Blob,
}

impl PublicAccess {
    /// Value sent in `x-ms-blob-public-access`; `None` means the header is omitted.
    pub fn header_value(&self) -> Option<&'static str> {
        match self {
            PublicAccess::Off => None,
            PublicAccess::Container => Some("container"),
            PublicAccess::Blob => Some("blob"),
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "off" | "none" | "private" => Some(PublicAccess::Off),
            "container" => Some(PublicAccess::Container),
            "blob" => Some(PublicAccess::Blob),
            _ => None,
        }
    }
}

/// Capabilities granted by a shared access signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SasPermissions {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
    pub list: bool,
}

impl SasPermissions {
    pub const READ: Self = Self {
        read: true,
        write: false,
        delete: false,
        list: false,
    };

    pub const ALL: Self = Self {
        read: true,
        write: true,
        delete: true,
        list: true,
    };

    /// Renders the permission string in the canonical `rwdl` order.
    pub fn as_string(&self) -> String {
        let mut s = String::with_capacity(4);
        for (enabled, c) in [
            (self.read, 'r'),
            (self.write, 'w'),
            (self.delete, 'd'),
            (self.list, 'l'),
        ] {
            if enabled {
                s.push(c);
            }
        }
        s
    }

    /// Parses a permission string; unknown letters are ignored.
    pub fn parse(s: &str) -> Self {
        Self {
            read: s.contains('r'),
            write: s.contains('w'),
            delete: s.contains('d'),
            list: s.contains('l'),
        }
    }
}

/// Access policy stored on a container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SharedAccessPolicy {
    /// Permission string exactly as stored, letters outside `rwdl` included.
    pub permission: String,
    pub start: Option<DateTime<Utc>>,
    pub expiry: Option<DateTime<Utc>>,
}

impl SharedAccessPolicy {
    /// A read-only policy expiring at `expiry`.
    pub fn read_only(expiry: DateTime<Utc>) -> Self {
        Self {
            permission: SasPermissions::READ.as_string(),
            start: None,
            expiry: Some(expiry),
        }
    }

    /// The permissions this crate understands.
    pub fn permissions(&self) -> SasPermissions {
        SasPermissions::parse(&self.permission)
    }
}

/// Named access policy on a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedIdentifier {
    pub id: String,
    pub policy: SharedAccessPolicy,
}

/// Container permission set as read from the storage service.
#[derive(Debug, Clone, Default)]
pub struct ContainerPermissions {
    pub public_access: PublicAccess,
    pub signed_identifiers: Vec<SignedIdentifier>,
    /// Container ETag at the time the permissions were read.
    pub etag: Option<String>,
}

impl ContainerPermissions {
    /// Looks up a named access policy.
    pub fn policy(&self, id: &str) -> Option<&SharedAccessPolicy> {
        self.signed_identifiers
            .iter()
            .find(|si| si.id == id)
            .map(|si| &si.policy)
    }
}

/// Container properties surfaced to callers.
#[derive(Debug, Clone, Default)]
pub struct ContainerProperties {
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

/// One entry of a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerItem {
    pub name: String,
    pub uri: String,
}
