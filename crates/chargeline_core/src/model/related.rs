//! Records reachable from an account through its declared relations.

use crate::model::account::AccountId;
use crate::model::relation::OwnerKind;
use serde::Serialize;

/// Lifecycle status row referenced by `accounts.status_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountStatus {
    pub id: i64,
    pub name: String,
}

/// Stored payment card referenced by `accounts.credit_card_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditCard {
    pub id: i64,
    pub brand: String,
    pub last_four: String,
    pub expires_on: Option<String>,
}

/// Push-notification token registered by the account's device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceToken {
    pub id: i64,
    pub account_id: AccountId,
    pub token: String,
    pub platform: String,
}

/// One finished or running charging session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargingHistory {
    pub id: i64,
    pub account_id: AccountId,
    pub charger_id: Option<i64>,
    /// Epoch milliseconds.
    pub started_at: i64,
    /// Epoch milliseconds, `None` while the session is running.
    pub ended_at: Option<i64>,
    pub charging_fee: i64,
}

/// Notice addressed to a single account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonalNotice {
    pub id: i64,
    pub account_id: AccountId,
    pub title: String,
    pub body: String,
    pub is_read: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Place {
    pub id: i64,
    pub name: String,
    pub address: Option<String>,
}

/// `place_accounts` pivot columns exposed with each place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlacePivot {
    pub account_id: AccountId,
}

/// A place joined through `place_accounts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaceMembership {
    #[serde(flatten)]
    pub place: Place,
    pub pivot: PlacePivot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Charger {
    pub id: i64,
    pub name: String,
    pub serial_number: String,
}

/// `charger_accounts` pivot row. Carries its own tombstone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargerPivot {
    pub id: i64,
    pub charging_fee: i64,
    pub order_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl ChargerPivot {
    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A charger joined through `charger_accounts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargerAssignment {
    #[serde(flatten)]
    pub charger: Charger,
    pub pivot: ChargerPivot,
}

/// Attributes written to a new `charger_accounts` pivot row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChargerPivotInput {
    pub charging_fee: i64,
    pub order_id: Option<String>,
}

/// Owner of a polymorphic cancellation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CancellationOwner {
    pub kind: OwnerKind,
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cancellation {
    pub id: i64,
    pub owner: CancellationOwner,
    pub reason: Option<String>,
    pub cancelled_at: i64,
}
