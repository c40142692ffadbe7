//! Inbound gateway notifications.
//!
//! Only parsed after the signature over the raw body has been checked.

use ledger::Reference;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, SettlementError};
use crate::gateway::{RemoteStatus, VerifiedCharge};

/// The only event that can settle a transaction.
pub const CHARGE_SUCCESS: &str = "charge.success";

#[derive(Debug, Deserialize)]
struct RawNotification {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct ChargeData {
    reference: String,
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    metadata: Value,
}

/// A parsed notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Charge {
        reference: Reference,
        charge: VerifiedCharge,
    },

    /// A charge whose reference could never have been issued here.
    Foreign { reference: String },

    /// Any other event. Acknowledged without action.
    Ignored { event: String },
}

impl Notification {
    /// Parses a signature-checked body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let raw: RawNotification = serde_json::from_slice(body)
            .map_err(|e| SettlementError::MalformedNotification(e.to_string()))?;

        if raw.event != CHARGE_SUCCESS {
            return Ok(Notification::Ignored { event: raw.event });
        }

        let data: ChargeData = serde_json::from_value(raw.data.clone())
            .map_err(|e| SettlementError::MalformedNotification(e.to_string()))?;
        let Ok(reference) = Reference::parse(&data.reference) else {
            return Ok(Notification::Foreign {
                reference: data.reference,
            });
        };

        Ok(Notification::Charge {
            reference,
            charge: VerifiedCharge {
                status: RemoteStatus::parse(&data.status),
                amount_minor: data.amount,
                currency: data.currency,
                metadata: data.metadata,
                raw: raw.data,
            },
        })
    }

    pub fn event(&self) -> &str {
        match self {
            Notification::Charge { .. } | Notification::Foreign { .. } => CHARGE_SUCCESS,
            Notification::Ignored { event } => event,
        }
    }
}
