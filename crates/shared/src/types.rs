//! Domain status and method enums for the billing state machines.
//!
//! Status columns stay TEXT in the database; rows are read as strings and
//! parsed with these enums at the point a decision is made, so an unknown
//! value degrades to `None` for one row instead of failing a whole batch.

use serde::{Deserialize, Serialize};

/// Lifecycle of a payment attempt. `Pending` is the only non-terminal
/// state; the poller never moves a record back to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Expired,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "expired" => Some(PaymentStatus::Expired),
            "canceled" => Some(PaymentStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Instrument used for a payment attempt. Only boleto payments are driven
/// by the scheduled jobs; pix and card settle synchronously at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Boleto,
    Pix,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Boleto => "boleto",
            PaymentMethod::Pix => "pix",
            PaymentMethod::Card => "card",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "boleto" => Some(PaymentMethod::Boleto),
            "pix" => Some(PaymentMethod::Pix),
            "card" => Some(PaymentMethod::Card),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cycle-scoped status of a recurring charge. The cycle generator resets a
/// settled charge back to `Pending` when the next cycle opens, so the paid
/// variants are terminal only within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeStatus {
    #[serde(rename = "pending")]
    Pending,
    /// Settled at the venue, confirmed by the owner.
    #[serde(rename = "pago_presencialmente")]
    PaidInPerson,
    /// Settled through the Quadra checkout.
    #[serde(rename = "pago_quadra")]
    PaidOnline,
}

impl ChargeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeStatus::Pending => "pending",
            ChargeStatus::PaidInPerson => "pago_presencialmente",
            ChargeStatus::PaidOnline => "pago_quadra",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ChargeStatus::Pending),
            "pago_presencialmente" => Some(ChargeStatus::PaidInPerson),
            "pago_quadra" => Some(ChargeStatus::PaidOnline),
            _ => None,
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, ChargeStatus::PaidInPerson | ChargeStatus::PaidOnline)
    }
}

impl std::fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a recurring charge is expected to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeKind {
    #[serde(rename = "presencial")]
    InPerson,
    #[serde(rename = "online")]
    Online,
}

impl ChargeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeKind::InPerson => "presencial",
            ChargeKind::Online => "online",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "presencial" => Some(ChargeKind::InPerson),
            "online" => Some(ChargeKind::Online),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChargeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
