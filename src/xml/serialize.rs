//! XML serialization.

use crate::auth::format_sas_datetime;
use crate::error::xml_escape;
use crate::models::{ContainerItem, SignedIdentifier};

/// Serializes signed identifiers (container access policies) for a Set Container ACL call.
pub fn serialize_signed_identifiers(identifiers: &[SignedIdentifier]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?>"#);
    xml.push_str("<SignedIdentifiers>");
    for id in identifiers {
        xml.push_str("<SignedIdentifier>");
        xml.push_str(&format!("<Id>{}</Id>", xml_escape(&id.id)));
        xml.push_str("<AccessPolicy>");
        if let Some(ref start) = id.policy.start {
            xml.push_str(&format!("<Start>{}</Start>", format_sas_datetime(start)));
        }
        if let Some(ref expiry) = id.policy.expiry {
            xml.push_str(&format!("<Expiry>{}</Expiry>", format_sas_datetime(expiry)));
        }
        xml.push_str(&format!(
            "<Permission>{}</Permission>",
            xml_escape(&id.policy.permission)
        ));
        xml.push_str("</AccessPolicy>");
        xml.push_str("</SignedIdentifier>");
    }
    xml.push_str("</SignedIdentifiers>");
    xml
}

/// Serializes a container listing returned to callers.
pub fn serialize_container_list(containers: &[ContainerItem], prefix: Option<&str>) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?>"#);
    xml.push_str("<Containers");
    if let Some(p) = prefix.filter(|p| !p.is_empty()) {
        xml.push_str(&format!(r#" Prefix="{}""#, xml_escape(p)));
    }
    xml.push('>');
    for container in containers {
        xml.push_str("<Container>");
        xml.push_str(&format!("<Name>{}</Name>", xml_escape(&container.name)));
        xml.push_str(&format!("<Url>{}</Url>", xml_escape(&container.uri)));
        xml.push_str("</Container>");
    }
    xml.push_str("</Containers>");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SharedAccessPolicy;
    use crate::xml::parse_signed_identifiers;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_serialize_signed_identifiers() {
        let xml = serialize_signed_identifiers(&[SignedIdentifier {
            id: "readonly".to_string(),
            policy: SharedAccessPolicy::read_only(
                Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap(),
            ),
        }]);
        assert!(xml.contains(
            "<SignedIdentifier><Id>readonly</Id><AccessPolicy><Expiry>2024-03-20T00:00:00Z</Expiry><Permission>r</Permission></AccessPolicy></SignedIdentifier>"
        ));
    }

    #[test]
    fn test_serialize_container_list() {
        let xml = serialize_container_list(
            &[ContainerItem {
                name: "a&b".to_string(),
                uri: "http://host/a&b".to_string(),
            }],
            Some("a"),
        );
        assert!(xml.contains(r#"<Containers Prefix="a">"#));
        assert!(xml.contains("<Name>a&amp;b</Name>"));
    }

    #[test]
    fn test_acl_rewrite_keeps_unmodelled_permissions() {
        let ids = parse_signed_identifiers(
            "<SignedIdentifiers><SignedIdentifier><Id>ops</Id><AccessPolicy><Expiry>2030-01-01T00:00:00Z</Expiry><Permission>racwdl</Permission></AccessPolicy></SignedIdentifier></SignedIdentifiers>",
        )
        .unwrap();
        let xml = serialize_signed_identifiers(&ids);
        assert!(xml.contains("<Id>ops</Id>"));
        assert!(xml.contains("<Permission>racwdl</Permission>"));
    }
}
