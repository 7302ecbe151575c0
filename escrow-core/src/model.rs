//! Core data model for escrow trades
//!
//! This module contains the trade record, the status state machine
//! enum, the fixed-width trade identifier and the conversions between
//! display-unit amount strings and integer base units.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TradeError;
use crate::TradeResult;

/// Number of fractional digits in the asset's display unit.
/// Amounts cross the external boundary as decimal strings and are held
/// internally as integer base units (1 display unit = 10^18 base units).
pub const BASE_UNIT_DECIMALS: u32 = 18;

/// Fixed-width opaque identifier for one escrow trade.
///
/// Accepts either the canonical 32-byte hex form (optionally
/// `0x`-prefixed) or a short human-readable label that is encoded into
/// the fixed width. Label encoding is injective for labels shorter
/// than the width, and re-parsing a canonical rendering returns the
/// same id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TradeId([u8; 32]);

impl TradeId {
    /// Identifier width in bytes
    pub const WIDTH: usize = 32;

    /// Parse either canonical hex or a human-readable label
    pub fn parse(input: &str) -> TradeResult<Self> {
        let s = input.trim();
        if s.is_empty() {
            return Err(TradeError::validation("trade id must not be empty"));
        }

        let hex_part = s.strip_prefix("0x").unwrap_or(s);
        if hex_part.len() == 2 * Self::WIDTH && hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            let mut buf = [0u8; Self::WIDTH];
            hex::decode_to_slice(hex_part, &mut buf)
                .map_err(|e| TradeError::validation(format!("invalid trade id hex: {e}")))?;
            return Ok(Self(buf));
        }

        Self::from_label(s)
    }

    /// Encode a short human-readable label into the fixed width.
    ///
    /// The label's UTF-8 bytes occupy the front of the array and the
    /// tail is zero-filled. Labels of 32 bytes or more and labels
    /// containing NUL bytes are rejected, which keeps the encoding
    /// total and injective.
    pub fn from_label(label: &str) -> TradeResult<Self> {
        let bytes = label.as_bytes();
        if bytes.is_empty() {
            return Err(TradeError::validation("trade id label must not be empty"));
        }
        if bytes.len() >= Self::WIDTH {
            return Err(TradeError::validation(format!(
                "trade id label must be shorter than {} bytes, got {}",
                Self::WIDTH,
                bytes.len()
            )));
        }
        if bytes.contains(&0) {
            return Err(TradeError::validation(
                "trade id label must not contain NUL bytes",
            ));
        }

        let mut buf = [0u8; Self::WIDTH];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn from_bytes(bytes: [u8; Self::WIDTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::WIDTH] {
        &self.0
    }

    /// Canonical lowercase `0x`-prefixed hex rendering
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TradeId({})", self.to_hex())
    }
}

impl FromStr for TradeId {
    type Err = TradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TradeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TradeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Opaque principal identity (seller, buyer or arbiter).
///
/// The lifecycle compares principals byte-wise; it attaches no meaning
/// to the contents beyond non-emptiness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new<S: Into<String>>(value: S) -> TradeResult<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(TradeError::validation("principal must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trade status state machine enum.
///
/// Ordinals are part of the external contract and must stay stable:
/// Created=0, Funded=1, Shipped=2, Completed=3, Disputed=4,
/// Resolved=5, Refunded=6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TradeStatus {
    /// Trade created by the seller, no funds held
    Created = 0,
    /// Buyer's deposit held in escrow
    Funded = 1,
    /// Seller marked the goods as shipped
    Shipped = 2,
    /// Escrow released to the seller
    Completed = 3,
    /// Frozen pending arbiter decision
    Disputed = 4,
    /// Arbiter split the escrow between the parties
    Resolved = 5,
    /// Full escrow returned to the buyer
    Refunded = 6,
}

impl TradeStatus {
    /// Stable wire ordinal
    pub fn ordinal(&self) -> u8 {
        *self as u8
    }

    /// Human-readable status name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Funded => "Funded",
            Self::Shipped => "Shipped",
            Self::Completed => "Completed",
            Self::Disputed => "Disputed",
            Self::Resolved => "Resolved",
            Self::Refunded => "Refunded",
        }
    }

    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Resolved | Self::Refunded)
    }

    /// Check if this state accepts the buyer's deposit
    pub fn can_deposit(&self) -> bool {
        matches!(self, Self::Created)
    }

    /// Check if this state allows the seller to mark shipment
    pub fn can_ship(&self) -> bool {
        matches!(self, Self::Funded)
    }

    /// Check if this state allows the buyer to confirm receipt
    pub fn can_confirm(&self) -> bool {
        matches!(self, Self::Funded | Self::Shipped)
    }

    /// Check if this state allows raising a dispute
    pub fn can_dispute(&self) -> bool {
        matches!(self, Self::Funded | Self::Shipped)
    }

    /// Check if this state allows an arbiter resolution
    pub fn can_resolve(&self) -> bool {
        matches!(self, Self::Disputed)
    }

    /// Check if this state allows a full refund to the buyer
    pub fn can_refund(&self) -> bool {
        matches!(self, Self::Funded | Self::Shipped | Self::Disputed)
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arbiter decision for a disputed trade.
///
/// A pure refund is the special case of a split where the full escrow
/// goes to the buyer; `SplitTo` lets the arbiter direct an explicit
/// amount to either party. Any unallocated remainder goes to the
/// seller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Return the full escrow to the buyer
    FullRefund,
    /// Pay `amount` base units to `recipient`, remainder to the seller
    SplitTo { recipient: Principal, amount: u128 },
}

/// The entity under management: one escrow trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: TradeId,
    pub seller: Principal,
    pub buyer: Principal,
    #[serde(with = "amount_string")]
    pub amount: u128,
    pub content_ref: String,
    pub status: TradeStatus,
    #[serde(with = "amount_string")]
    pub escrow_balance: u128,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradeRecord {
    /// Create a new trade record in the Created state with no funds held
    pub fn new(
        id: TradeId,
        seller: Principal,
        buyer: Principal,
        amount: u128,
        content_ref: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            seller,
            buyer,
            amount,
            content_ref,
            status: TradeStatus::Created,
            escrow_balance: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Serialize u128 amounts as base-10 strings; JSON numbers cannot
/// carry the full base-unit range.
pub mod amount_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u128>().map_err(serde::de::Error::custom)
    }
}

/// Parse a display-unit decimal amount string into integer base units.
///
/// Rejects negative values, more than [`BASE_UNIT_DECIMALS`]
/// fractional digits and values that overflow u128.
pub fn parse_display_amount(input: &str) -> TradeResult<u128> {
    let s = input.trim();
    if s.is_empty() {
        return Err(TradeError::validation("amount must not be empty"));
    }

    let decimal = Decimal::from_str(s)
        .map_err(|e| TradeError::validation(format!("invalid amount {s:?}: {e}")))?;
    if decimal.is_sign_negative() {
        return Err(TradeError::validation(format!(
            "amount must not be negative, got {s}"
        )));
    }

    let decimal = decimal.normalize();
    let scale = decimal.scale();
    if scale > BASE_UNIT_DECIMALS {
        return Err(TradeError::validation(format!(
            "amount {s} has more than {BASE_UNIT_DECIMALS} decimal places"
        )));
    }

    let mantissa = decimal.mantissa() as u128;
    mantissa
        .checked_mul(10u128.pow(BASE_UNIT_DECIMALS - scale))
        .ok_or_else(|| TradeError::validation(format!("amount {s} overflows base units")))
}

/// Render integer base units back into a display-unit decimal string
pub fn format_display_amount(base_units: u128) -> String {
    let divisor = 10u128.pow(BASE_UNIT_DECIMALS);
    let whole = base_units / divisor;
    let frac = base_units % divisor;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:018}");
    format!("{whole}.{}", frac.trim_end_matches('0'))
}
