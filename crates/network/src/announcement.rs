//! Node announcement feed messages
//!
//! A node publishes a replaceable envelope describing its session API.
//! Tags scope the announcement to a pool and may override body fields.

use serde::{Deserialize, Serialize};
use tracing::debug;
use tunnelpass_core::{NodeDescriptor, DEFAULT_BACKEND};
use tunnelpass_crypto::SigningKeypair;

use crate::envelope::{tag, Envelope};
use crate::{NetworkError, Result};

/// Event kind for node announcements
pub const NODE_ANNOUNCEMENT_KIND: u32 = 38383;

/// Announcement body published as envelope content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAnnouncement {
    #[serde(default, alias = "api_url")]
    pub api_address: String,
    #[serde(default)]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backends: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl NodeAnnouncement {
    pub fn new(api_address: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            api_address: api_address.into(),
            region: region.into(),
            ..Default::default()
        }
    }

    /// Sign into an envelope, mirroring body fields as tags
    pub fn into_envelope(
        self,
        keypair: &SigningKeypair,
        pool: Option<&str>,
        created_at: i64,
    ) -> Result<Envelope> {
        let mut tags = Vec::new();
        if let Some(pool) = pool.filter(|p| !p.is_empty()) {
            tags.push(tag("pool", pool));
        }
        if !self.region.is_empty() {
            tags.push(tag("region", self.region.as_str()));
        }
        if let Some(country) = &self.country {
            tags.push(tag("country", country.as_str()));
        }
        if let Some(city) = &self.city {
            tags.push(tag("city", city.as_str()));
        }
        for backend in self.backends.iter().flatten() {
            tags.push(tag("backend", backend.as_str()));
        }

        let content =
            serde_json::to_string(&self).map_err(|e| NetworkError::Serialization(e.to_string()))?;
        Envelope::sign(keypair, NODE_ANNOUNCEMENT_KIND, tags, content, created_at)
    }
}

/// Whether an announcement belongs to `pool`. No configured pool accepts all.
pub fn pool_matches(envelope: &Envelope, pool: Option<&str>) -> bool {
    match pool.map(str::trim).filter(|p| !p.is_empty()) {
        Some(pool) => envelope
            .all_tags("pool")
            .iter()
            .any(|tag| tag.trim().eq_ignore_ascii_case(pool)),
        None => true,
    }
}

/// Turn an announcement envelope into a descriptor keyed by its publisher.
///
/// Tags override body fields. The caller is responsible for verifying the
/// envelope signature first.
pub fn node_from_envelope(envelope: &Envelope) -> Result<NodeDescriptor> {
    if envelope.kind != NODE_ANNOUNCEMENT_KIND {
        return Err(NetworkError::InvalidEnvelope(format!(
            "unexpected kind {}",
            envelope.kind
        )));
    }
    let body: NodeAnnouncement = serde_json::from_str(&envelope.content)
        .map_err(|e| NetworkError::InvalidEnvelope(format!("announcement body: {}", e)))?;

    let address = body.api_address.trim();
    if address.is_empty() {
        return Err(NetworkError::InvalidEnvelope("missing api_address".to_string()));
    }

    let pick = |name: &str, fallback: Option<&str>| -> String {
        envelope
            .first_tag(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or(fallback)
            .unwrap_or_default()
            .trim()
            .to_string()
    };
    let region = pick("region", Some(body.region.as_str()));
    let country = pick("country", body.country.as_deref());
    let city = pick("city", body.city.as_deref());

    let tagged: Vec<&str> = envelope.all_tags("backend");
    let mut backends: Vec<String> = if tagged.is_empty() {
        body.backends.unwrap_or_default()
    } else {
        tagged.into_iter().map(str::to_string).collect()
    };
    backends.retain(|b| !b.trim().is_empty());
    if backends.is_empty() {
        backends.push(DEFAULT_BACKEND.to_string());
    }

    debug!(
        "Announcement from {} -> {} ({})",
        &envelope.author[..8.min(envelope.author.len())],
        address,
        region
    );

    Ok(NodeDescriptor::new(envelope.author.clone(), address, region)
        .with_location(country, city)
        .with_backends(backends.iter().map(|b| b.trim().to_ascii_lowercase())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_announcement_to_descriptor() {
        let kp = SigningKeypair::generate();
        let mut ann = NodeAnnouncement::new("http://203.0.113.7:9090", "eu-west");
        ann.country = Some("DE".to_string());
        ann.city = Some("Frankfurt".to_string());
        ann.backends = Some(vec!["openvpn".to_string(), "wireguard".to_string()]);

        let env = ann.into_envelope(&kp, Some("pool-a"), NOW).unwrap();
        assert!(env.verify().is_ok());
        assert!(pool_matches(&env, Some("pool-a")));

        let node = node_from_envelope(&env).unwrap();
        assert_eq!(node.id, kp.public_key_hex());
        assert_eq!(node.address, "http://203.0.113.7:9090");
        assert_eq!(node.region, "eu-west");
        assert_eq!(node.country, "DE");
        assert_eq!(node.city, "Frankfurt");
        assert!(node.supports("wireguard"));
        assert!(node.statically_enabled);
    }

    #[test]
    fn test_tags_override_body() {
        let kp = SigningKeypair::generate();
        let content = serde_json::to_string(&NodeAnnouncement::new(" http://10.0.0.1:9090 ", "us-east"))
            .unwrap();
        let env = Envelope::sign(
            &kp,
            NODE_ANNOUNCEMENT_KIND,
            vec![tag("region", " ap-south "), tag("backend", "WireGuard")],
            content,
            NOW,
        )
        .unwrap();

        let node = node_from_envelope(&env).unwrap();
        assert_eq!(node.address, "http://10.0.0.1:9090");
        assert_eq!(node.region, "ap-south");
        assert!(node.supports("wireguard"));
        assert!(!node.supports("openvpn"));
    }

    #[test]
    fn test_default_backend_when_absent() {
        let kp = SigningKeypair::generate();
        let env = NodeAnnouncement::new("http://10.0.0.1:9090", "local")
            .into_envelope(&kp, None, NOW)
            .unwrap();
        let node = node_from_envelope(&env).unwrap();
        assert_eq!(node.supported_backends.len(), 1);
        assert!(node.supports(DEFAULT_BACKEND));
    }

    #[test]
    fn test_legacy_field_name_and_empty_tag() {
        let kp = SigningKeypair::generate();
        let env = Envelope::sign(
            &kp,
            NODE_ANNOUNCEMENT_KIND,
            vec![tag("region", "  ")],
            "{\"api_url\":\"http://10.0.0.9:9090\",\"region\":\"us-east\"}",
            NOW,
        )
        .unwrap();
        let node = node_from_envelope(&env).unwrap();
        assert_eq!(node.address, "http://10.0.0.9:9090");
        assert_eq!(node.region, "us-east");
    }

    #[test]
    fn test_missing_address_rejected() {
        let kp = SigningKeypair::generate();
        let env = Envelope::sign(&kp, NODE_ANNOUNCEMENT_KIND, vec![], "{\"region\":\"x\"}", NOW).unwrap();
        assert!(node_from_envelope(&env).is_err());

        let env = Envelope::sign(&kp, NODE_ANNOUNCEMENT_KIND, vec![], "not json", NOW).unwrap();
        assert!(node_from_envelope(&env).is_err());
    }

    #[test]
    fn test_pool_scope() {
        let kp = SigningKeypair::generate();
        let env = NodeAnnouncement::new("http://10.0.0.1:9090", "local")
            .into_envelope(&kp, Some("pool-a"), NOW)
            .unwrap();
        assert!(pool_matches(&env, None));
        assert!(pool_matches(&env, Some("")));
        assert!(!pool_matches(&env, Some("pool-b")));
        assert!(pool_matches(&env, Some("POOL-A")));

        let unscoped = NodeAnnouncement::new("http://10.0.0.1:9090", "local")
            .into_envelope(&kp, None, NOW)
            .unwrap();
        assert!(!pool_matches(&unscoped, Some("pool-a")));
    }
}
