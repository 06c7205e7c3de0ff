use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Backend assumed when a caller or an announcement does not name one
pub const DEFAULT_BACKEND: &str = "openvpn";

/// Region sentinel meaning "no preference"
pub const AUTO_REGION: &str = "auto";

const DAY_SECS: i64 = 24 * 60 * 60;

/// Current unix time in seconds
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// A relay node a client may request a session from.
///
/// Descriptors are replaced wholesale, keyed by `id`; nothing mutates a
/// single field of an observed descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Stable unique id (hostname for static nodes, publisher key for gossip)
    pub id: String,
    /// Base URI of the node's session API, e.g. `http://203.0.113.7:9090`
    pub address: String,
    pub region: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub city: String,
    /// Tunnel backends the node serves
    pub supported_backends: BTreeSet<String>,
    /// Administrative switch; disabled nodes are never probed or selected
    pub statically_enabled: bool,
}

impl NodeDescriptor {
    pub fn new(id: impl Into<String>, address: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            region: region.into(),
            country: String::new(),
            city: String::new(),
            supported_backends: BTreeSet::from([DEFAULT_BACKEND.to_string()]),
            statically_enabled: true,
        }
    }

    pub fn with_backends<I, S>(mut self, backends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_backends = backends.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_location(mut self, country: impl Into<String>, city: impl Into<String>) -> Self {
        self.country = country.into();
        self.city = city.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.statically_enabled = false;
        self
    }

    /// Case-insensitive backend membership
    pub fn supports(&self, backend: &str) -> bool {
        self.supported_backends
            .iter()
            .any(|b| b.eq_ignore_ascii_case(backend))
    }

    /// Case-insensitive, whitespace-trimmed region match
    pub fn in_region(&self, region: &str) -> bool {
        self.region.trim().eq_ignore_ascii_case(region.trim())
    }
}

/// Latest reachability measurement for one node.
///
/// Absence of a record means the node was never probed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub node_id: String,
    pub latency_ms: u64,
    pub healthy: bool,
    /// Unix seconds of the probe that produced this record
    pub last_checked: i64,
    pub last_error: Option<String>,
}

impl HealthRecord {
    pub fn healthy(node_id: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            node_id: node_id.into(),
            latency_ms,
            healthy: true,
            last_checked: unix_now(),
            last_error: None,
        }
    }

    pub fn unhealthy(node_id: impl Into<String>, latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            latency_ms,
            healthy: false,
            last_checked: unix_now(),
            last_error: Some(error.into()),
        }
    }
}

/// Subscription plan purchased by a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    Weekly,
    Monthly,
    Yearly,
}

impl PlanKind {
    /// Parse a plan identifier. Unknown identifiers are monthly plans.
    pub fn parse(plan: &str) -> Self {
        match plan.trim().to_ascii_lowercase().as_str() {
            "weekly" => Self::Weekly,
            "yearly" => Self::Yearly,
            _ => Self::Monthly,
        }
    }

    /// Validity period in seconds
    pub fn duration_secs(&self) -> i64 {
        match self {
            Self::Weekly => 7 * DAY_SECS,
            Self::Monthly => 30 * DAY_SECS,
            Self::Yearly => 365 * DAY_SECS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

/// The signed part of a subscription credential.
///
/// Field order is part of the canonical encoding; do not reorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPayload {
    pub token_id: String,
    /// Hex public key of the subscriber
    pub subject_key: String,
    pub plan_kind: PlanKind,
    pub tier: String,
    pub issued_at: i64,
    pub expires_at: i64,
    /// Uniqueness salt
    pub nonce: String,
    /// Hex Ed25519 public key of the issuer
    pub issuer_key: String,
}

impl SubscriptionPayload {
    /// Canonical byte encoding that signatures are computed over
    pub fn canonical_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// Payload plus the issuer's signature (hex encoded)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionCredential {
    pub payload: SubscriptionPayload,
    pub signature: String,
}

impl SubscriptionCredential {
    pub fn token_id(&self) -> &str {
        &self.payload.token_id
    }

    pub fn issuer_key(&self) -> &str {
        &self.payload.issuer_key
    }

    pub fn expires_at(&self) -> i64 {
        self.payload.expires_at
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> SubscriptionPayload {
        SubscriptionPayload {
            token_id: "sub_1".to_string(),
            subject_key: "aa".repeat(32),
            plan_kind: PlanKind::Weekly,
            tier: "full".to_string(),
            issued_at: 1_700_000_000,
            expires_at: 1_700_604_800,
            nonce: "n1".to_string(),
            issuer_key: "bb".repeat(32),
        }
    }

    #[test]
    fn test_plan_durations() {
        assert_eq!(PlanKind::Weekly.duration_secs(), 604_800);
        assert_eq!(PlanKind::Monthly.duration_secs(), 2_592_000);
        assert_eq!(PlanKind::Yearly.duration_secs(), 31_536_000);
    }

    #[test]
    fn test_unknown_plan_is_monthly() {
        assert_eq!(PlanKind::parse("weekly"), PlanKind::Weekly);
        assert_eq!(PlanKind::parse(" Yearly "), PlanKind::Yearly);
        assert_eq!(PlanKind::parse("monthly"), PlanKind::Monthly);
        assert_eq!(PlanKind::parse("lifetime"), PlanKind::Monthly);
        assert_eq!(PlanKind::parse(""), PlanKind::Monthly);
    }

    #[test]
    fn test_canonical_bytes_deterministic() {
        let payload = sample_payload();
        assert_eq!(payload.canonical_bytes().unwrap(), payload.canonical_bytes().unwrap());

        let mut other = payload.clone();
        other.nonce = "n2".to_string();
        assert_ne!(payload.canonical_bytes().unwrap(), other.canonical_bytes().unwrap());
    }

    #[test]
    fn test_canonical_field_order() {
        let bytes = sample_payload().canonical_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("{\"token_id\":\"sub_1\",\"subject_key\""));
        assert!(text.contains("\"plan_kind\":\"weekly\""));
    }

    #[test]
    fn test_expiry_boundary() {
        let payload = sample_payload();
        assert!(!payload.is_expired_at(payload.expires_at - 1));
        assert!(payload.is_expired_at(payload.expires_at));
    }

    #[test]
    fn test_node_backend_and_region_matching() {
        let node = NodeDescriptor::new("n1", "http://10.0.0.1:9090", "EU-West")
            .with_backends(["OpenVPN", "wireguard"]);
        assert!(node.supports("openvpn"));
        assert!(node.supports("WireGuard"));
        assert!(!node.supports("ikev2"));
        assert!(node.in_region("eu-west"));
        assert!(node.in_region(" eu-west "));
        assert!(!node.in_region("us-east"));
    }

    #[test]
    fn test_default_node_backend() {
        let node = NodeDescriptor::new("n1", "http://localhost:9090", "local");
        assert!(node.supports(DEFAULT_BACKEND));
        assert!(node.statically_enabled);
        assert!(!node.disabled().statically_enabled);
    }

    #[test]
    fn test_credential_json_roundtrip() {
        let cred = SubscriptionCredential {
            payload: sample_payload(),
            signature: "cc".repeat(64),
        };
        let json = cred.to_json().unwrap();
        assert_eq!(SubscriptionCredential::from_json(&json).unwrap(), cred);
    }
}
