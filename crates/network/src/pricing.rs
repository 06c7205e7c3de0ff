//! Network pricing announcements

use serde::{Deserialize, Serialize};
use tunnelpass_core::PlanKind;
use tunnelpass_crypto::SigningKeypair;

use crate::envelope::{tag, Envelope};
use crate::{NetworkError, Result};

/// Replaceable event kind for pricing
pub const PRICING_KIND: u32 = 30070;

pub const PRICING_TOPIC: &str = "vpn-network-pricing";

/// Plan prices in sats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub weekly: u64,
    pub monthly: u64,
    pub yearly: u64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            weekly: 1500,
            monthly: 5000,
            yearly: 45000,
        }
    }
}

impl Pricing {
    pub fn price_of(&self, plan: PlanKind) -> u64 {
        match plan {
            PlanKind::Weekly => self.weekly,
            PlanKind::Monthly => self.monthly,
            PlanKind::Yearly => self.yearly,
        }
    }

    pub fn to_envelope(&self, keypair: &SigningKeypair, created_at: i64) -> Result<Envelope> {
        let content =
            serde_json::to_string(self).map_err(|e| NetworkError::Serialization(e.to_string()))?;
        Envelope::sign(
            keypair,
            PRICING_KIND,
            vec![tag("d", PRICING_TOPIC), tag("t", PRICING_TOPIC)],
            content,
            created_at,
        )
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        if envelope.kind != PRICING_KIND {
            return Err(NetworkError::InvalidEnvelope(format!(
                "unexpected kind {}",
                envelope.kind
            )));
        }
        serde_json::from_str(&envelope.content)
            .map_err(|e| NetworkError::InvalidEnvelope(format!("pricing body: {}", e)))
    }
}
