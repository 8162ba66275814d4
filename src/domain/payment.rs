use crate::domain::keyspace::{Account, DerivedKey, PublicKey};
use crate::domain::transfer::BlockHash;
use crate::error::{GatewayError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::Add;

/// Raw units per whole ledger unit.
pub const RAW_PER_UNIT: u128 = 10u128.pow(30);
/// Decimal places kept when converting a fiat amount to ledger units.
pub const FIAT_CONVERSION_SCALE: u32 = 6;
/// Currency code meaning "ledger-native, no conversion".
pub const NATIVE_CURRENCY: &str = "BCB";

/// Ledger-native amount in the smallest unit.
///
/// Serialized as a decimal string since the values exceed what JSON
/// numbers carry faithfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RawAmount(pub u128);

impl RawAmount {
    pub const ZERO: Self = Self(0);

    /// Converts a whole-unit decimal into raw units without losing precision.
    pub fn from_units(units: Decimal) -> Result<Self> {
        if units <= Decimal::ZERO {
            return Err(GatewayError::invalid("amount must be positive"));
        }
        let units = units.normalize();
        let mantissa = u128::try_from(units.mantissa())
            .map_err(|_| GatewayError::invalid("amount must be positive"))?;
        // Decimal scale never exceeds 28, so the exponent stays positive.
        let factor = 10u128.pow(30 - units.scale());
        mantissa
            .checked_mul(factor)
            .map(Self)
            .ok_or_else(|| GatewayError::invalid("amount too large"))
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Add for RawAmount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl Sum for RawAmount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for RawAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for RawAmount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RawAmount {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u128>()
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

/// Upper-cased currency code of the original request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn native() -> Self {
        Self(NATIVE_CURRENCY.to_string())
    }

    /// Parses a currency code; an empty code means the ledger-native unit.
    pub fn parse(code: &str) -> Result<Self> {
        let code = code.trim();
        if code.is_empty() {
            return Ok(Self::native());
        }
        if !(3..=10).contains(&code.len()) || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(GatewayError::invalid(format!("invalid currency: {code}")));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn is_native(&self) -> bool {
        self.0 == NATIVE_CURRENCY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Checking,
    Confirmed,
    Expired,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Expired)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Checking => "checking",
            Self::Confirmed => "confirmed",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// The terminal transition applied to a payment exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    Confirmed {
        block_hash: BlockHash,
        received: RawAmount,
        at: DateTime<Utc>,
    },
    Expired {
        at: DateTime<Utc>,
    },
}

/// A request to receive funds on a freshly derived account.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Payment {
    pub index: u64,
    pub account: Account,
    pub public_key: PublicKey,
    pub amount: RawAmount,
    pub amount_in_currency: Decimal,
    pub currency: Currency,
    /// Merchant correlation value, echoed back unmodified.
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub status: PaymentStatus,
    pub block_hash: Option<BlockHash>,
    pub received_amount: Option<RawAmount>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn new(
        index: u64,
        key: &DerivedKey,
        amount: RawAmount,
        amount_in_currency: Decimal,
        currency: Currency,
        state: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            index,
            account: key.account.clone(),
            public_key: key.public_key,
            amount,
            amount_in_currency,
            currency,
            state,
            created_at,
            status: PaymentStatus::Pending,
            block_hash: None,
            received_amount: None,
            confirmed_at: None,
            expired_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == PaymentStatus::Confirmed
    }

    /// Whether the watch deadline has passed at `now`.
    pub fn is_past_deadline(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.created_at > timeout
    }

    /// Moves `Pending` to `Checking`. Any other state is left alone.
    pub fn mark_checking(&mut self) -> bool {
        if self.status == PaymentStatus::Pending {
            self.status = PaymentStatus::Checking;
            true
        } else {
            false
        }
    }

    /// Applies a terminal outcome.
    ///
    /// Returns `false` without touching the record when it is already
    /// terminal.
    pub fn apply(&mut self, outcome: &TerminalOutcome) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        match outcome {
            TerminalOutcome::Confirmed {
                block_hash,
                received,
                at,
            } => {
                self.status = PaymentStatus::Confirmed;
                self.block_hash = Some(block_hash.clone());
                self.received_amount = Some(*received);
                self.confirmed_at = Some(*at);
            }
            TerminalOutcome::Expired { at } => {
                self.status = PaymentStatus::Expired;
                self.expired_at = Some(*at);
            }
        }
        true
    }

    /// When the record reached its terminal state, if it has.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at.or(self.expired_at)
    }
}
