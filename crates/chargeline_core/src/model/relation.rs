//! Declarative relationship graph for accounts.
//!
//! # Responsibility
//! - Name every relation an account declares and describe how it joins.
//! - Map polymorphic owner kinds to their owning collections.
//!
//! # Invariants
//! - Descriptors are static data; resolution lives in `repo::relation_repo`.
//! - `Relation::name()` and `Relation::parse()` round-trip.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Relations declared by `Account`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Status,
    CreditCard,
    DeviceToken,
    ChargingHistories,
    Notices,
    Places,
    Chargers,
    Cancellation,
}

/// How a relation joins the account row to its related rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Local foreign key on `accounts` equals the related primary key.
    OneToOneLocal {
        local_key: &'static str,
        related_table: &'static str,
        required: bool,
    },
    /// Related table holds a foreign key to `accounts.id`, at most one row.
    OneToOneForeign {
        foreign_key: &'static str,
        related_table: &'static str,
    },
    /// Related table holds a foreign key to `accounts.id`.
    OneToMany {
        foreign_key: &'static str,
        related_table: &'static str,
    },
    /// Joined through a pivot table keyed by both sides.
    ManyToMany {
        pivot_table: &'static str,
        parent_key: &'static str,
        related_key: &'static str,
        related_table: &'static str,
        pivot_columns: &'static [&'static str],
        soft_deletes: bool,
    },
    /// Related row is matched on `(kind_column, id_column)`.
    Polymorphic {
        kind_column: &'static str,
        id_column: &'static str,
        related_table: &'static str,
        owner: OwnerKind,
    },
}

impl Relation {
    pub const ALL: [Relation; 8] = [
        Relation::Status,
        Relation::CreditCard,
        Relation::DeviceToken,
        Relation::ChargingHistories,
        Relation::Notices,
        Relation::Places,
        Relation::Chargers,
        Relation::Cancellation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::CreditCard => "credit_card",
            Self::DeviceToken => "device_token",
            Self::ChargingHistories => "charging_histories",
            Self::Notices => "notices",
            Self::Places => "places",
            Self::Chargers => "chargers",
            Self::Cancellation => "cancellation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim();
        Self::ALL
            .into_iter()
            .find(|relation| relation.name() == normalized)
    }

    pub fn kind(self) -> RelationKind {
        match self {
            Self::Status => RelationKind::OneToOneLocal {
                local_key: "status_id",
                related_table: "account_statuses",
                required: true,
            },
            Self::CreditCard => RelationKind::OneToOneLocal {
                local_key: "credit_card_id",
                related_table: "credit_cards",
                required: false,
            },
            Self::DeviceToken => RelationKind::OneToOneForeign {
                foreign_key: "account_id",
                related_table: "device_tokens",
            },
            Self::ChargingHistories => RelationKind::OneToMany {
                foreign_key: "account_id",
                related_table: "charging_histories",
            },
            Self::Notices => RelationKind::OneToMany {
                foreign_key: "account_id",
                related_table: "personal_notices",
            },
            Self::Places => RelationKind::ManyToMany {
                pivot_table: "place_accounts",
                parent_key: "account_id",
                related_key: "place_id",
                related_table: "places",
                pivot_columns: &["account_id"],
                soft_deletes: false,
            },
            Self::Chargers => RelationKind::ManyToMany {
                pivot_table: "charger_accounts",
                parent_key: "account_id",
                related_key: "charger_id",
                related_table: "chargers",
                pivot_columns: &[
                    "id",
                    "charging_fee",
                    "order_id",
                    "created_at",
                    "updated_at",
                    "deleted_at",
                ],
                soft_deletes: true,
            },
            Self::Cancellation => RelationKind::Polymorphic {
                kind_column: "owner_kind",
                id_column: "owner_id",
                related_table: "cancellations",
                owner: OwnerKind::Account,
            },
        }
    }
}

impl Display for Relation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Default eager relations for account reads.
pub fn default_eager_relations() -> Vec<Relation> {
    vec![Relation::Status, Relation::Places]
}

/// Removes duplicates while keeping first-seen order.
pub fn dedup_relations(relations: &[Relation]) -> Vec<Relation> {
    let mut ordered = Vec::with_capacity(relations.len());
    for relation in relations {
        if !ordered.contains(relation) {
            ordered.push(*relation);
        }
    }
    ordered
}

/// Entity kinds that can own a polymorphic cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    Account,
    Booking,
}

const OWNER_KIND_TABLES: &[(OwnerKind, &str, &str)] = &[
    (OwnerKind::Account, "account", "accounts"),
    (OwnerKind::Booking, "booking", "bookings"),
];

impl OwnerKind {
    /// Stable tag stored in `*_kind` columns.
    pub fn as_str(self) -> &'static str {
        owner_entry(self).1
    }

    /// Collection holding rows of this kind.
    pub fn table(self) -> &'static str {
        owner_entry(self).2
    }

    pub fn parse(value: &str) -> Option<Self> {
        OWNER_KIND_TABLES
            .iter()
            .find(|(_, tag, _)| *tag == value)
            .map(|(kind, _, _)| *kind)
    }
}

fn owner_entry(kind: OwnerKind) -> &'static (OwnerKind, &'static str, &'static str) {
    // Every variant has exactly one row in OWNER_KIND_TABLES.
    match kind {
        OwnerKind::Account => &OWNER_KIND_TABLES[0],
        OwnerKind::Booking => &OWNER_KIND_TABLES[1],
    }
}

#[cfg(test)]
mod tests {
    use super::{dedup_relations, OwnerKind, Relation, RelationKind};

    #[test]
    fn relation_names_round_trip() {
        for relation in Relation::ALL {
            assert_eq!(Relation::parse(relation.name()), Some(relation));
        }
        assert_eq!(Relation::parse("bookings"), None);
    }

    #[test]
    fn only_charger_pivot_soft_deletes() {
        let soft: Vec<_> = Relation::ALL
            .into_iter()
            .filter(|relation| {
                matches!(
                    relation.kind(),
                    RelationKind::ManyToMany {
                        soft_deletes: true,
                        ..
                    }
                )
            })
            .collect();
        assert_eq!(soft, vec![Relation::Chargers]);
    }

    #[test]
    fn owner_kind_lookup_is_consistent() {
        for kind in [OwnerKind::Account, OwnerKind::Booking] {
            assert_eq!(OwnerKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(OwnerKind::Account.table(), "accounts");
        assert_eq!(OwnerKind::parse("user"), None);
    }

    #[test]
    fn dedup_keeps_first_seen_order() {
        let relations = [
            Relation::Places,
            Relation::Status,
            Relation::Places,
            Relation::Chargers,
        ];
        assert_eq!(
            dedup_relations(&relations),
            vec![Relation::Places, Relation::Status, Relation::Chargers]
        );
    }
}
