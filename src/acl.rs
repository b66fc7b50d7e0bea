//! Access control list representation: canned ACLs, grant headers, and the
//! `AccessControlPolicy` XML wire form.
//!
//! ACLs are stored for API compatibility as opaque JSON blobs on bucket and
//! object rows. They do not gate access; only signature verification does.

use serde::{Deserialize, Serialize};

/// The group URI granting access to everyone.
pub const ALL_USERS_URI: &str = "http://acs.amazonaws.com/groups/global/AllUsers";
/// The group URI granting access to any authenticated caller.
pub const AUTHENTICATED_USERS_URI: &str =
    "http://acs.amazonaws.com/groups/global/AuthenticatedUsers";

/// Owner element of an access control policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub display_name: String,
}

/// A single grant: who gets what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub grantee: Grantee,
    pub permission: String,
}

/// Grantee variants, tagged so the JSON round-trips unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Grantee {
    CanonicalUser { id: String, display_name: String },
    Group { uri: String },
    AmazonCustomerByEmail { email: String },
}

/// The full access control policy stored on buckets and objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlPolicy {
    pub owner: Owner,
    pub grants: Vec<Grant>,
}

/// Error raised by ACL parsing (canned value, grant header, or XML body).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclError(pub String);

impl std::fmt::Display for AclError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for AclError {}

/// The permissions S3 accepts in grants.
const VALID_PERMISSIONS: &[&str] = &["FULL_CONTROL", "READ", "WRITE", "READ_ACP", "WRITE_ACP"];

impl AccessControlPolicy {
    /// A policy granting the owner FULL_CONTROL and nothing else.
    pub fn full_control(owner_id: &str, display_name: &str) -> Self {
        Self {
            owner: Owner {
                id: owner_id.to_string(),
                display_name: display_name.to_string(),
            },
            grants: vec![Grant {
                grantee: Grantee::CanonicalUser {
                    id: owner_id.to_string(),
                    display_name: display_name.to_string(),
                },
                permission: "FULL_CONTROL".to_string(),
            }],
        }
    }

    /// Expand a canned ACL header value into an explicit grant list.
    pub fn from_canned(canned: &str, owner_id: &str, display_name: &str) -> Result<Self, AclError> {
        let mut policy = Self::full_control(owner_id, display_name);
        match canned {
            "private" => {}
            "public-read" => {
                policy.grants.push(group_grant(ALL_USERS_URI, "READ"));
            }
            "public-read-write" => {
                policy.grants.push(group_grant(ALL_USERS_URI, "READ"));
                policy.grants.push(group_grant(ALL_USERS_URI, "WRITE"));
            }
            "authenticated-read" => {
                policy
                    .grants
                    .push(group_grant(AUTHENTICATED_USERS_URI, "READ"));
            }
            "bucket-owner-read" | "bucket-owner-full-control" => {
                // Single-tenant: the bucket owner is the object owner.
            }
            other => {
                return Err(AclError(format!("Invalid canned ACL: {other}")));
            }
        }
        Ok(policy)
    }

    /// Build a policy from explicit `x-amz-grant-*` headers.
    ///
    /// Each header value is a comma-separated list of
    /// `id="..."`, `uri="..."`, or `emailAddress="..."` entries.
    pub fn from_grant_headers(
        headers: &[(&str, &str)],
        owner_id: &str,
        display_name: &str,
    ) -> Result<Self, AclError> {
        let mut grants = Vec::new();
        for (header, value) in headers {
            let permission = match *header {
                "x-amz-grant-read" => "READ",
                "x-amz-grant-write" => "WRITE",
                "x-amz-grant-read-acp" => "READ_ACP",
                "x-amz-grant-write-acp" => "WRITE_ACP",
                "x-amz-grant-full-control" => "FULL_CONTROL",
                other => return Err(AclError(format!("Unknown grant header: {other}"))),
            };
            for entry in value.split(',') {
                let entry = entry.trim();
                if entry.is_empty() {
                    continue;
                }
                let (kind, raw) = entry
                    .split_once('=')
                    .ok_or_else(|| AclError(format!("Malformed grantee: {entry}")))?;
                let raw = raw.trim_matches('"');
                let grantee = match kind.trim() {
                    "id" => Grantee::CanonicalUser {
                        id: raw.to_string(),
                        display_name: raw.to_string(),
                    },
                    "uri" => Grantee::Group {
                        uri: raw.to_string(),
                    },
                    "emailAddress" => Grantee::AmazonCustomerByEmail {
                        email: raw.to_string(),
                    },
                    other => return Err(AclError(format!("Unknown grantee type: {other}"))),
                };
                grants.push(Grant {
                    grantee,
                    permission: permission.to_string(),
                });
            }
        }
        if grants.is_empty() {
            return Err(AclError("No grants in grant headers".to_string()));
        }
        Ok(Self {
            owner: Owner {
                id: owner_id.to_string(),
                display_name: display_name.to_string(),
            },
            grants,
        })
    }

    /// Serialize for storage in a bucket/object row.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Parse a stored ACL blob, falling back to owner FULL_CONTROL when the
    /// blob is missing or unreadable.
    pub fn from_json_or_default(json: &str, owner_id: &str, display_name: &str) -> Self {
        serde_json::from_str(json).unwrap_or_else(|_| Self::full_control(owner_id, display_name))
    }

    /// Render the `<AccessControlPolicy>` response body.
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(
            r#"<AccessControlPolicy xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
        );
        xml.push('\n');
        xml.push_str("  <Owner>\n");
        xml.push_str(&format!("    <ID>{}</ID>\n", escape(&self.owner.id)));
        xml.push_str(&format!(
            "    <DisplayName>{}</DisplayName>\n",
            escape(&self.owner.display_name)
        ));
        xml.push_str("  </Owner>\n");
        xml.push_str("  <AccessControlList>\n");
        for grant in &self.grants {
            xml.push_str("    <Grant>\n");
            match &grant.grantee {
                Grantee::CanonicalUser { id, display_name } => {
                    xml.push_str(
                        "      <Grantee xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:type=\"CanonicalUser\">\n",
                    );
                    xml.push_str(&format!("        <ID>{}</ID>\n", escape(id)));
                    xml.push_str(&format!(
                        "        <DisplayName>{}</DisplayName>\n",
                        escape(display_name)
                    ));
                    xml.push_str("      </Grantee>\n");
                }
                Grantee::Group { uri } => {
                    xml.push_str(
                        "      <Grantee xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:type=\"Group\">\n",
                    );
                    xml.push_str(&format!("        <URI>{}</URI>\n", escape(uri)));
                    xml.push_str("      </Grantee>\n");
                }
                Grantee::AmazonCustomerByEmail { email } => {
                    xml.push_str(
                        "      <Grantee xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:type=\"AmazonCustomerByEmail\">\n",
                    );
                    xml.push_str(&format!(
                        "        <EmailAddress>{}</EmailAddress>\n",
                        escape(email)
                    ));
                    xml.push_str("      </Grantee>\n");
                }
            }
            xml.push_str(&format!(
                "      <Permission>{}</Permission>\n",
                escape(&grant.permission)
            ));
            xml.push_str("    </Grant>\n");
        }
        xml.push_str("  </AccessControlList>\n");
        xml.push_str("</AccessControlPolicy>");
        xml
    }

    /// Parse an `<AccessControlPolicy>` request body.
    pub fn from_xml(body: &[u8]) -> Result<Self, AclError> {
        use quick_xml::events::Event;
        use quick_xml::Reader;

        let mut reader = Reader::from_reader(body);
        reader.config_mut().trim_text(true);

        let mut owner_id = String::new();
        let mut owner_display = String::new();
        let mut grants: Vec<Grant> = Vec::new();

        let mut in_owner = false;
        let mut in_grant = false;
        let mut in_grantee = false;
        let mut grantee_type = String::new();
        let mut grantee_id = String::new();
        let mut grantee_display = String::new();
        let mut grantee_uri = String::new();
        let mut grantee_email = String::new();
        let mut permission = String::new();
        let mut current_tag = String::new();
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    match tag.as_str() {
                        "Owner" => in_owner = true,
                        "Grant" => {
                            in_grant = true;
                            grantee_type.clear();
                            grantee_id.clear();
                            grantee_display.clear();
                            grantee_uri.clear();
                            grantee_email.clear();
                            permission.clear();
                        }
                        "Grantee" => {
                            in_grantee = true;
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref().ends_with(b"type") {
                                    grantee_type =
                                        String::from_utf8_lossy(&attr.value).to_string();
                                }
                            }
                        }
                        _ => current_tag = tag,
                    }
                }
                Ok(Event::Text(ref e)) => {
                    let text = e
                        .unescape()
                        .map_err(|_| AclError("Invalid XML text".to_string()))?
                        .to_string();
                    match current_tag.as_str() {
                        "ID" if in_grantee => grantee_id = text,
                        "ID" if in_owner => owner_id = text,
                        "DisplayName" if in_grantee => grantee_display = text,
                        "DisplayName" if in_owner => owner_display = text,
                        "URI" if in_grantee => grantee_uri = text,
                        "EmailAddress" if in_grantee => grantee_email = text,
                        "Permission" if in_grant => permission = text,
                        _ => {}
                    }
                }
                Ok(Event::End(ref e)) => {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    match tag.as_str() {
                        "Owner" => in_owner = false,
                        "Grantee" => in_grantee = false,
                        "Grant" => {
                            in_grant = false;
                            if !VALID_PERMISSIONS.contains(&permission.as_str()) {
                                return Err(AclError(format!(
                                    "Invalid permission: {permission}"
                                )));
                            }
                            let grantee = match grantee_type.as_str() {
                                "CanonicalUser" => Grantee::CanonicalUser {
                                    id: grantee_id.clone(),
                                    display_name: grantee_display.clone(),
                                },
                                "Group" => Grantee::Group {
                                    uri: grantee_uri.clone(),
                                },
                                "AmazonCustomerByEmail" => Grantee::AmazonCustomerByEmail {
                                    email: grantee_email.clone(),
                                },
                                other => {
                                    return Err(AclError(format!(
                                        "Invalid grantee type: {other}"
                                    )))
                                }
                            };
                            grants.push(Grant {
                                grantee,
                                permission: permission.clone(),
                            });
                        }
                        _ => current_tag.clear(),
                    }
                }
                Ok(Event::Eof) => break,
                Err(_) => return Err(AclError("Malformed ACL XML".to_string())),
                _ => {}
            }
            buf.clear();
        }

        if owner_id.is_empty() || grants.is_empty() {
            return Err(AclError("ACL must carry an owner and at least one grant".to_string()));
        }

        Ok(Self {
            owner: Owner {
                id: owner_id,
                display_name: owner_display,
            },
            grants,
        })
    }
}

fn group_grant(uri: &str, permission: &str) -> Grant {
    Grant {
        grantee: Grantee::Group {
            uri: uri.to_string(),
        },
        permission: permission.to_string(),
    }
}

fn escape(s: &str) -> String {
    crate::api::xml::escape_xml(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_control() {
        let acl = AccessControlPolicy::full_control("owner1", "Owner One");
        assert_eq!(acl.grants.len(), 1);
        assert_eq!(acl.grants[0].permission, "FULL_CONTROL");
    }

    #[test]
    fn test_canned_private() {
        let acl = AccessControlPolicy::from_canned("private", "o", "O").unwrap();
        assert_eq!(acl.grants.len(), 1);
    }

    #[test]
    fn test_canned_public_read() {
        let acl = AccessControlPolicy::from_canned("public-read", "o", "O").unwrap();
        assert_eq!(acl.grants.len(), 2);
        assert!(matches!(
            &acl.grants[1].grantee,
            Grantee::Group { uri } if uri == ALL_USERS_URI
        ));
    }

    #[test]
    fn test_canned_public_read_write() {
        let acl = AccessControlPolicy::from_canned("public-read-write", "o", "O").unwrap();
        assert_eq!(acl.grants.len(), 3);
    }

    #[test]
    fn test_canned_invalid() {
        assert!(AccessControlPolicy::from_canned("nope", "o", "O").is_err());
    }

    #[test]
    fn test_grant_headers() {
        let acl = AccessControlPolicy::from_grant_headers(
            &[
                ("x-amz-grant-read", "id=\"user1\", uri=\"http://example/group\""),
                ("x-amz-grant-full-control", "emailAddress=\"a@b.c\""),
            ],
            "o",
            "O",
        )
        .unwrap();
        assert_eq!(acl.grants.len(), 3);
        assert_eq!(acl.grants[0].permission, "READ");
        assert_eq!(acl.grants[2].permission, "FULL_CONTROL");
    }

    #[test]
    fn test_json_roundtrip() {
        let acl = AccessControlPolicy::from_canned("public-read", "owner1", "Owner One").unwrap();
        let json = acl.to_json();
        let parsed = AccessControlPolicy::from_json_or_default(&json, "x", "X");
        assert_eq!(parsed, acl);
    }

    #[test]
    fn test_json_fallback_on_garbage() {
        let parsed = AccessControlPolicy::from_json_or_default("not json", "o", "O");
        assert_eq!(parsed, AccessControlPolicy::full_control("o", "O"));
    }

    #[test]
    fn test_xml_roundtrip() {
        let acl = AccessControlPolicy::from_canned("public-read", "owner1", "Owner One").unwrap();
        let xml = acl.to_xml();
        let parsed = AccessControlPolicy::from_xml(xml.as_bytes()).unwrap();
        assert_eq!(parsed, acl);
    }

    #[test]
    fn test_xml_rejects_bad_permission() {
        let xml = r#"<AccessControlPolicy>
            <Owner><ID>o</ID><DisplayName>O</DisplayName></Owner>
            <AccessControlList>
                <Grant>
                    <Grantee xsi:type="CanonicalUser"><ID>o</ID><DisplayName>O</DisplayName></Grantee>
                    <Permission>SUPERUSER</Permission>
                </Grant>
            </AccessControlList>
        </AccessControlPolicy>"#;
        assert!(AccessControlPolicy::from_xml(xml.as_bytes()).is_err());
    }

    #[test]
    fn test_xml_rejects_empty() {
        assert!(AccessControlPolicy::from_xml(b"<AccessControlPolicy/>").is_err());
        assert!(AccessControlPolicy::from_xml(b"garbage <<>>").is_err());
    }
}
