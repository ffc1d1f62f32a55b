//! Account entity.
//!
//! # Responsibility
//! - Define the canonical account record and its loaded relation slots.
//! - Compute appended attributes from currently loaded state.
//! - Own the outward serialization shape.
//!
//! # Invariants
//! - `password_hash` and `remember_token` are never serialized.
//! - `payment_member_id` is always serialized and never stored.
//! - `deleted_at` is the only source of truth for tombstone state.

use crate::model::related::{
    AccountStatus, Cancellation, ChargerAssignment, ChargingHistory, CreditCard, DeviceToken,
    PersonalNotice, PlaceMembership,
};
use crate::model::relation::Relation;
use serde::{Serialize, Serializer};

/// Primary key assigned by storage.
pub type AccountId = i64;

/// Prefix of derived payment-provider member identifiers.
pub const PAYMENT_MEMBER_PREFIX: &str = "GM";

/// Relation slot that distinguishes "not loaded" from loaded data.
#[derive(Debug, Clone, PartialEq)]
pub enum Related<T> {
    Unloaded,
    Loaded(T),
}

impl<T> Default for Related<T> {
    fn default() -> Self {
        Self::Unloaded
    }
}

impl<T> Related<T> {
    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Loaded(value) => Some(value),
            Self::Unloaded => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    pub fn is_unloaded(&self) -> bool {
        !self.is_loaded()
    }
}

impl<T: Serialize> Serialize for Related<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Loaded(value) => value.serialize(serializer),
            Self::Unloaded => serializer.serialize_none(),
        }
    }
}

/// Relation data attached to one account read.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccountRelations {
    #[serde(skip_serializing_if = "Related::is_unloaded")]
    pub status: Related<AccountStatus>,
    #[serde(skip_serializing_if = "Related::is_unloaded")]
    pub credit_card: Related<Option<CreditCard>>,
    #[serde(skip_serializing_if = "Related::is_unloaded")]
    pub device_token: Related<Option<DeviceToken>>,
    #[serde(skip_serializing_if = "Related::is_unloaded")]
    pub charging_histories: Related<Vec<ChargingHistory>>,
    #[serde(skip_serializing_if = "Related::is_unloaded")]
    pub notices: Related<Vec<PersonalNotice>>,
    #[serde(skip_serializing_if = "Related::is_unloaded")]
    pub places: Related<Vec<PlaceMembership>>,
    #[serde(skip_serializing_if = "Related::is_unloaded")]
    pub chargers: Related<Vec<ChargerAssignment>>,
    #[serde(skip_serializing_if = "Related::is_unloaded")]
    pub cancellation: Related<Option<Cancellation>>,
}

impl AccountRelations {
    pub fn is_loaded(&self, relation: Relation) -> bool {
        match relation {
            Relation::Status => self.status.is_loaded(),
            Relation::CreditCard => self.credit_card.is_loaded(),
            Relation::DeviceToken => self.device_token.is_loaded(),
            Relation::ChargingHistories => self.charging_histories.is_loaded(),
            Relation::Notices => self.notices.is_loaded(),
            Relation::Places => self.places.is_loaded(),
            Relation::Chargers => self.chargers.is_loaded(),
            Relation::Cancellation => self.cancellation.is_loaded(),
        }
    }

    /// Names of loaded relations in declaration order.
    pub fn loaded(&self) -> Vec<Relation> {
        Relation::ALL
            .into_iter()
            .filter(|relation| self.is_loaded(*relation))
            .collect()
    }
}

/// Canonical account record.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: AccountId,
    /// Business code assigned at creation.
    pub code: String,
    pub name: String,
    pub email: String,
    pub email_verified_at: Option<i64>,
    /// Argon2 PHC string. Hidden from serialization.
    pub password_hash: Option<String>,
    /// Hidden from serialization.
    pub remember_token: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub zip_code: Option<String>,
    pub city_code: Option<String>,
    pub city: Option<String>,
    pub prefecture_code: Option<String>,
    pub prefecture: Option<String>,
    pub address: Option<String>,
    pub building_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_checked_tutorial: bool,
    pub using_app: bool,
    pub status_id: i64,
    pub credit_card_id: Option<i64>,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds.
    pub updated_at: i64,
    /// Soft-delete tombstone, epoch milliseconds.
    pub deleted_at: Option<i64>,
    pub relations: AccountRelations,
}

impl Account {
    /// Returns whether this account is visible to default queries.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Member identifier used with the external payment provider.
    ///
    /// Derived on every call from the code and the linked card: the loaded
    /// `credit_card` relation wins over the raw foreign key. `None` when no
    /// card is linked.
    pub fn payment_member_id(&self) -> Option<String> {
        let card_id = match self.relations.credit_card.get() {
            Some(card) => card.as_ref().map(|card| card.id),
            None => self.credit_card_id,
        }?;
        Some(format!(
            "{PAYMENT_MEMBER_PREFIX}{}{card_id:08}",
            self.code
        ))
    }
}

#[derive(Serialize)]
struct AccountRepr<'a> {
    id: AccountId,
    code: &'a str,
    name: &'a str,
    email: &'a str,
    email_verified_at: Option<i64>,
    first_name: Option<&'a str>,
    last_name: Option<&'a str>,
    phone: Option<&'a str>,
    zip_code: Option<&'a str>,
    city_code: Option<&'a str>,
    city: Option<&'a str>,
    prefecture_code: Option<&'a str>,
    prefecture: Option<&'a str>,
    address: Option<&'a str>,
    building_name: Option<&'a str>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    is_checked_tutorial: bool,
    using_app: bool,
    status_id: i64,
    credit_card_id: Option<i64>,
    created_at: i64,
    updated_at: i64,
    deleted_at: Option<i64>,
    payment_member_id: Option<String>,
    #[serde(flatten)]
    relations: &'a AccountRelations,
}

impl Serialize for Account {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        AccountRepr {
            id: self.id,
            code: &self.code,
            name: &self.name,
            email: &self.email,
            email_verified_at: self.email_verified_at,
            first_name: self.first_name.as_deref(),
            last_name: self.last_name.as_deref(),
            phone: self.phone.as_deref(),
            zip_code: self.zip_code.as_deref(),
            city_code: self.city_code.as_deref(),
            city: self.city.as_deref(),
            prefecture_code: self.prefecture_code.as_deref(),
            prefecture: self.prefecture.as_deref(),
            address: self.address.as_deref(),
            building_name: self.building_name.as_deref(),
            latitude: self.latitude,
            longitude: self.longitude,
            is_checked_tutorial: self.is_checked_tutorial,
            using_app: self.using_app,
            status_id: self.status_id,
            credit_card_id: self.credit_card_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
            payment_member_id: self.payment_member_id(),
            relations: &self.relations,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
pub(crate) fn sample_account() -> Account {
    Account {
        id: 7,
        code: "TCU131010042".to_string(),
        name: "user".to_string(),
        email: "user@example.com".to_string(),
        email_verified_at: None,
        password_hash: Some("$argon2id$v=19$stub".to_string()),
        remember_token: Some("remember-me".to_string()),
        first_name: None,
        last_name: None,
        phone: None,
        zip_code: None,
        city_code: Some("13101".to_string()),
        city: None,
        prefecture_code: None,
        prefecture: None,
        address: None,
        building_name: None,
        latitude: None,
        longitude: None,
        is_checked_tutorial: false,
        using_app: true,
        status_id: 1,
        credit_card_id: None,
        created_at: 1_700_000_000_000,
        updated_at: 1_700_000_000_000,
        deleted_at: None,
        relations: AccountRelations::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::{sample_account, Related};
    use crate::model::related::CreditCard;
    use crate::model::relation::Relation;

    #[test]
    fn serialization_hides_credentials_and_appends_member_id() {
        let account = sample_account();
        let value = serde_json::to_value(&account).unwrap();
        let object = value.as_object().unwrap();

        assert!(!object.contains_key("password_hash"));
        assert!(!object.contains_key("password"));
        assert!(!object.contains_key("remember_token"));
        assert!(object.contains_key("payment_member_id"));
        assert!(object["payment_member_id"].is_null());
        assert!(!object.contains_key("status"));
    }

    #[test]
    fn member_id_follows_loaded_card_over_foreign_key() {
        let mut account = sample_account();
        account.credit_card_id = Some(3);
        assert_eq!(
            account.payment_member_id().as_deref(),
            Some("GMTCU13101004200000003")
        );

        account.relations.credit_card = Related::Loaded(Some(CreditCard {
            id: 9,
            brand: "visa".to_string(),
            last_four: "4242".to_string(),
            expires_on: None,
        }));
        assert_eq!(
            account.payment_member_id().as_deref(),
            Some("GMTCU13101004200000009")
        );

        account.relations.credit_card = Related::Loaded(None);
        assert_eq!(account.payment_member_id(), None);
    }

    #[test]
    fn loaded_relations_follow_declaration_order() {
        let mut account = sample_account();
        account.relations.places = Related::Loaded(Vec::new());
        account.relations.status = Related::Loaded(crate::model::related::AccountStatus {
            id: 1,
            name: "active".to_string(),
        });
        assert_eq!(
            account.relations.loaded(),
            vec![Relation::Status, Relation::Places]
        );
    }
}
