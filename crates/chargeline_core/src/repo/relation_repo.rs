//! Relation resolution and pivot maintenance for accounts.
//!
//! # Responsibility
//! - Resolve each declared `Relation` into typed related records.
//! - Own pivot-table writes (attach, detach, cascade, revive).
//!
//! # Invariants
//! - SQL is built from `RelationKind` descriptors, never from caller text.
//! - Trashed charger pivots are hidden unless explicitly requested.
//! - One-to-many relations are ordered by related primary key.

use crate::model::account::{Account, AccountId, Related};
use crate::model::related::{
    AccountStatus, Cancellation, CancellationOwner, Charger, ChargerAssignment, ChargerPivot,
    ChargerPivotInput, ChargingHistory, CreditCard, DeviceToken, PersonalNotice, Place,
    PlaceMembership, PlacePivot,
};
use crate::model::relation::{OwnerKind, Relation, RelationKind};
use crate::repo::base::{int_to_bool, RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::collections::HashMap;

/// Row shape of one related collection.
trait RelatedRecord: Sized {
    /// Columns of the related table, unqualified.
    const COLUMNS: &'static [&'static str];

    fn from_row(row: &Row<'_>) -> RepoResult<Self>;
}

impl RelatedRecord for AccountStatus {
    const COLUMNS: &'static [&'static str] = &["id", "name"];

    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
        })
    }
}

impl RelatedRecord for CreditCard {
    const COLUMNS: &'static [&'static str] = &["id", "brand", "last_four", "expires_on"];

    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            brand: row.get("brand")?,
            last_four: row.get("last_four")?,
            expires_on: row.get("expires_on")?,
        })
    }
}

impl RelatedRecord for DeviceToken {
    const COLUMNS: &'static [&'static str] = &["id", "account_id", "token", "platform"];

    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            token: row.get("token")?,
            platform: row.get("platform")?,
        })
    }
}

impl RelatedRecord for ChargingHistory {
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "account_id",
        "charger_id",
        "started_at",
        "ended_at",
        "charging_fee",
    ];

    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            charger_id: row.get("charger_id")?,
            started_at: row.get("started_at")?,
            ended_at: row.get("ended_at")?,
            charging_fee: row.get("charging_fee")?,
        })
    }
}

impl RelatedRecord for PersonalNotice {
    const COLUMNS: &'static [&'static str] =
        &["id", "account_id", "title", "body", "is_read", "created_at"];

    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            title: row.get("title")?,
            body: row.get("body")?,
            is_read: int_to_bool(row.get("is_read")?, "personal_notices.is_read")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Pivot columns are selected as `pivot_<column>`.
impl RelatedRecord for PlaceMembership {
    const COLUMNS: &'static [&'static str] = &["id", "name", "address"];

    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        Ok(Self {
            place: Place {
                id: row.get("id")?,
                name: row.get("name")?,
                address: row.get("address")?,
            },
            pivot: PlacePivot {
                account_id: row.get("pivot_account_id")?,
            },
        })
    }
}

impl RelatedRecord for ChargerAssignment {
    const COLUMNS: &'static [&'static str] = &["id", "name", "serial_number"];

    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        Ok(Self {
            charger: Charger {
                id: row.get("id")?,
                name: row.get("name")?,
                serial_number: row.get("serial_number")?,
            },
            pivot: ChargerPivot {
                id: row.get("pivot_id")?,
                charging_fee: row.get("pivot_charging_fee")?,
                order_id: row.get("pivot_order_id")?,
                created_at: row.get("pivot_created_at")?,
                updated_at: row.get("pivot_updated_at")?,
                deleted_at: row.get("pivot_deleted_at")?,
            },
        })
    }
}

impl RelatedRecord for Cancellation {
    const COLUMNS: &'static [&'static str] =
        &["id", "owner_kind", "owner_id", "reason", "cancelled_at"];

    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        let kind_text: String = row.get("owner_kind")?;
        let kind = OwnerKind::parse(&kind_text).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid owner kind `{kind_text}` in cancellations.owner_kind"
            ))
        })?;
        Ok(Self {
            id: row.get("id")?,
            owner: CancellationOwner {
                kind,
                id: row.get("owner_id")?,
            },
            reason: row.get("reason")?,
            cancelled_at: row.get("cancelled_at")?,
        })
    }
}

/// Largest key list bound into one `IN (...)` query.
const MAX_BATCH_KEYS: usize = 500;

/// Resolves declared account relations against one connection.
///
/// Each relation is fetched with one `IN (...)` query per batch of owners,
/// then distributed to the accounts.
pub struct RelationLoader<'conn> {
    conn: &'conn Connection,
}

impl<'conn> RelationLoader<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Required lifecycle status. A dangling `status_id` is invalid data.
    pub fn status(&self, account: &Account) -> RepoResult<AccountStatus> {
        let mut found = self.by_local_key(Relation::Status, &[account.status_id])?;
        take_first(&mut found, account.status_id)
            .ok_or_else(|| missing_status(account.id, account.status_id))
    }

    pub fn credit_card(&self, account: &Account) -> RepoResult<Option<CreditCard>> {
        let Some(card_id) = account.credit_card_id else {
            return Ok(None);
        };
        let mut found = self.by_local_key(Relation::CreditCard, &[card_id])?;
        Ok(take_first(&mut found, card_id))
    }

    pub fn device_token(&self, account: &Account) -> RepoResult<Option<DeviceToken>> {
        let mut found = self.by_foreign_key(Relation::DeviceToken, &[account.id])?;
        Ok(take_first(&mut found, account.id))
    }

    pub fn charging_histories(&self, account: &Account) -> RepoResult<Vec<ChargingHistory>> {
        let mut found = self.by_foreign_key(Relation::ChargingHistories, &[account.id])?;
        Ok(found.remove(&account.id).unwrap_or_default())
    }

    pub fn notices(&self, account: &Account) -> RepoResult<Vec<PersonalNotice>> {
        let mut found = self.by_foreign_key(Relation::Notices, &[account.id])?;
        Ok(found.remove(&account.id).unwrap_or_default())
    }

    pub fn places(&self, account: &Account) -> RepoResult<Vec<PlaceMembership>> {
        let mut found = self.through_pivot(Relation::Places, &[account.id], false)?;
        Ok(found.remove(&account.id).unwrap_or_default())
    }

    /// Chargers joined through `charger_accounts`.
    ///
    /// Pivot rows with a tombstone are skipped unless `include_trashed_pivots`.
    pub fn chargers(
        &self,
        account: &Account,
        include_trashed_pivots: bool,
    ) -> RepoResult<Vec<ChargerAssignment>> {
        let mut found =
            self.through_pivot(Relation::Chargers, &[account.id], include_trashed_pivots)?;
        Ok(found.remove(&account.id).unwrap_or_default())
    }

    pub fn cancellation(&self, account: &Account) -> RepoResult<Option<Cancellation>> {
        let mut found = self.polymorphic(Relation::Cancellation, &[account.id])?;
        Ok(take_first(&mut found, account.id))
    }

    /// Fills the requested relation slots; other slots are left as they are.
    pub fn load(&self, account: &mut Account, relations: &[Relation]) -> RepoResult<()> {
        self.load_many(std::slice::from_mut(account), relations)
    }

    /// Like `load`, issuing one query per relation for the whole slice.
    pub fn load_many(&self, accounts: &mut [Account], relations: &[Relation]) -> RepoResult<()> {
        if accounts.is_empty() {
            return Ok(());
        }
        let ids: Vec<AccountId> = accounts.iter().map(|account| account.id).collect();

        for &relation in relations {
            match relation {
                Relation::Status => {
                    let keys: Vec<i64> = accounts.iter().map(|account| account.status_id).collect();
                    let found = self.by_local_key::<AccountStatus>(relation, &keys)?;
                    for account in accounts.iter_mut() {
                        let status = found
                            .get(&account.status_id)
                            .and_then(|rows| rows.first())
                            .cloned()
                            .ok_or_else(|| missing_status(account.id, account.status_id))?;
                        account.relations.status = Related::Loaded(status);
                    }
                }
                Relation::CreditCard => {
                    let keys: Vec<i64> = accounts
                        .iter()
                        .filter_map(|account| account.credit_card_id)
                        .collect();
                    let found = self.by_local_key::<CreditCard>(relation, &keys)?;
                    for account in accounts.iter_mut() {
                        let card = account
                            .credit_card_id
                            .and_then(|card_id| found.get(&card_id))
                            .and_then(|rows| rows.first())
                            .cloned();
                        account.relations.credit_card = Related::Loaded(card);
                    }
                }
                Relation::DeviceToken => {
                    let mut found = self.by_foreign_key(relation, &ids)?;
                    for account in accounts.iter_mut() {
                        account.relations.device_token =
                            Related::Loaded(take_first(&mut found, account.id));
                    }
                }
                Relation::ChargingHistories => {
                    let mut found = self.by_foreign_key(relation, &ids)?;
                    for account in accounts.iter_mut() {
                        account.relations.charging_histories =
                            Related::Loaded(found.remove(&account.id).unwrap_or_default());
                    }
                }
                Relation::Notices => {
                    let mut found = self.by_foreign_key(relation, &ids)?;
                    for account in accounts.iter_mut() {
                        account.relations.notices =
                            Related::Loaded(found.remove(&account.id).unwrap_or_default());
                    }
                }
                Relation::Places => {
                    let mut found = self.through_pivot(relation, &ids, false)?;
                    for account in accounts.iter_mut() {
                        account.relations.places =
                            Related::Loaded(found.remove(&account.id).unwrap_or_default());
                    }
                }
                Relation::Chargers => {
                    let mut found = self.through_pivot(relation, &ids, false)?;
                    for account in accounts.iter_mut() {
                        account.relations.chargers =
                            Related::Loaded(found.remove(&account.id).unwrap_or_default());
                    }
                }
                Relation::Cancellation => {
                    let mut found = self.polymorphic(relation, &ids)?;
                    for account in accounts.iter_mut() {
                        account.relations.cancellation =
                            Related::Loaded(take_first(&mut found, account.id));
                    }
                }
            }
        }
        Ok(())
    }

    /// Related rows keyed by their own primary key.
    fn by_local_key<T: RelatedRecord>(
        &self,
        relation: Relation,
        keys: &[i64],
    ) -> RepoResult<Grouped<T>> {
        let RelationKind::OneToOneLocal { related_table, .. } = relation.kind() else {
            return Err(unexpected_kind(relation));
        };
        let head = format!(
            "SELECT {}, id AS owner_key FROM {related_table} WHERE id",
            T::COLUMNS.join(", ")
        );
        query_grouped(self.conn, &head, ";", &[], keys)
    }

    /// Related rows keyed by owning account, ordered by related primary key.
    fn by_foreign_key<T: RelatedRecord>(
        &self,
        relation: Relation,
        account_ids: &[AccountId],
    ) -> RepoResult<Grouped<T>> {
        let (foreign_key, related_table) = match relation.kind() {
            RelationKind::OneToOneForeign {
                foreign_key,
                related_table,
            }
            | RelationKind::OneToMany {
                foreign_key,
                related_table,
            } => (foreign_key, related_table),
            _ => return Err(unexpected_kind(relation)),
        };
        let head = format!(
            "SELECT {}, {foreign_key} AS owner_key FROM {related_table} WHERE {foreign_key}",
            T::COLUMNS.join(", ")
        );
        query_grouped(self.conn, &head, " ORDER BY id ASC;", &[], account_ids)
    }

    fn through_pivot<T: RelatedRecord>(
        &self,
        relation: Relation,
        account_ids: &[AccountId],
        include_trashed_pivots: bool,
    ) -> RepoResult<Grouped<T>> {
        let RelationKind::ManyToMany {
            pivot_table,
            parent_key,
            related_key,
            related_table,
            pivot_columns,
            soft_deletes,
        } = relation.kind()
        else {
            return Err(unexpected_kind(relation));
        };

        let mut columns: Vec<String> = T::COLUMNS
            .iter()
            .map(|column| format!("r.{column}"))
            .collect();
        columns.extend(
            pivot_columns
                .iter()
                .map(|column| format!("p.{column} AS pivot_{column}")),
        );
        columns.push(format!("p.{parent_key} AS owner_key"));

        let head = format!(
            "SELECT {}
             FROM {related_table} r
             INNER JOIN {pivot_table} p ON p.{related_key} = r.id
             WHERE p.{parent_key}",
            columns.join(", ")
        );
        let mut tail = String::new();
        if soft_deletes && !include_trashed_pivots {
            tail.push_str(" AND p.deleted_at IS NULL");
        }
        tail.push_str(" ORDER BY r.id ASC, p.rowid ASC;");

        query_grouped(self.conn, &head, &tail, &[], account_ids)
    }

    fn polymorphic<T: RelatedRecord>(
        &self,
        relation: Relation,
        owner_ids: &[i64],
    ) -> RepoResult<Grouped<T>> {
        let RelationKind::Polymorphic {
            kind_column,
            id_column,
            related_table,
            owner,
        } = relation.kind()
        else {
            return Err(unexpected_kind(relation));
        };
        let head = format!(
            "SELECT {}, {id_column} AS owner_key
             FROM {related_table}
             WHERE {kind_column} = ? AND {id_column}",
            T::COLUMNS.join(", ")
        );
        let leading = [Value::Text(owner.as_str().to_string())];
        query_grouped(self.conn, &head, ";", &leading, owner_ids)
    }
}

/// Related records grouped by the `owner_key` column, in row order.
type Grouped<T> = HashMap<i64, Vec<T>>;

/// Runs `{head} IN (?, ...){tail}` over `keys` in batches.
///
/// `leading` binds precede the key list. Rows of one key always land in the
/// same batch, so per-key order follows the statement's `ORDER BY`.
fn query_grouped<T: RelatedRecord>(
    conn: &Connection,
    head: &str,
    tail: &str,
    leading: &[Value],
    keys: &[i64],
) -> RepoResult<Grouped<T>> {
    let mut keys = keys.to_vec();
    keys.sort_unstable();
    keys.dedup();

    let mut grouped: Grouped<T> = HashMap::new();
    for chunk in keys.chunks(MAX_BATCH_KEYS) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!("{head} IN ({placeholders}){tail}");
        let binds = leading
            .iter()
            .cloned()
            .chain(chunk.iter().map(|key| Value::Integer(*key)));

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        while let Some(row) = rows.next()? {
            let key: i64 = row.get("owner_key")?;
            grouped.entry(key).or_default().push(T::from_row(row)?);
        }
    }
    Ok(grouped)
}

fn take_first<T>(grouped: &mut Grouped<T>, key: i64) -> Option<T> {
    grouped
        .remove(&key)
        .and_then(|records| records.into_iter().next())
}

fn missing_status(account_id: AccountId, status_id: i64) -> RepoError {
    RepoError::InvalidData(format!(
        "account {account_id} references missing status {status_id}"
    ))
}

fn unexpected_kind(relation: Relation) -> RepoError {
    RepoError::InvalidData(format!(
        "relation `{relation}` does not support this resolution"
    ))
}

fn pivot_descriptor(
    relation: Relation,
) -> RepoResult<(&'static str, &'static str, &'static str, bool)> {
    match relation.kind() {
        RelationKind::ManyToMany {
            pivot_table,
            parent_key,
            related_key,
            soft_deletes,
            ..
        } => Ok((pivot_table, parent_key, related_key, soft_deletes)),
        _ => Err(unexpected_kind(relation)),
    }
}

/// Links a place to an account. Returns whether a new pivot row was written.
pub(crate) fn attach_place(
    conn: &Connection,
    account_id: AccountId,
    place_id: i64,
) -> RepoResult<bool> {
    let (pivot_table, parent_key, related_key, _) = pivot_descriptor(Relation::Places)?;
    let changed = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {pivot_table} ({parent_key}, {related_key}) VALUES (?1, ?2);"
        ),
        params![account_id, place_id],
    )?;
    Ok(changed == 1)
}

/// Inserts a new charger pivot row and returns its id.
pub(crate) fn attach_charger(
    conn: &Connection,
    account_id: AccountId,
    charger_id: i64,
    input: &ChargerPivotInput,
) -> RepoResult<i64> {
    let (pivot_table, parent_key, related_key, _) = pivot_descriptor(Relation::Chargers)?;
    conn.execute(
        &format!(
            "INSERT INTO {pivot_table} ({parent_key}, {related_key}, charging_fee, order_id)
             VALUES (?1, ?2, ?3, ?4);"
        ),
        params![
            account_id,
            charger_id,
            input.charging_fee,
            input.order_id.as_deref()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Removes pivot rows linking `account_id` to `related_id`.
///
/// Soft-deletable pivots get a tombstone; others are deleted. Returns the
/// number of rows affected.
pub(crate) fn detach(
    conn: &Connection,
    relation: Relation,
    account_id: AccountId,
    related_id: i64,
    now_ms: i64,
) -> RepoResult<usize> {
    let (pivot_table, parent_key, related_key, soft_deletes) = pivot_descriptor(relation)?;
    let changed = if soft_deletes {
        conn.execute(
            &format!(
                "UPDATE {pivot_table}
                 SET deleted_at = ?3, updated_at = ?3
                 WHERE {parent_key} = ?1 AND {related_key} = ?2 AND deleted_at IS NULL;"
            ),
            params![account_id, related_id, now_ms],
        )?
    } else {
        conn.execute(
            &format!("DELETE FROM {pivot_table} WHERE {parent_key} = ?1 AND {related_key} = ?2;"),
            params![account_id, related_id],
        )?
    };
    Ok(changed)
}

/// Tombstones every active soft-deletable pivot row of the account with
/// `deleted_at`. Returns the number of rows affected.
pub(crate) fn cascade_soft_delete(
    conn: &Connection,
    account_id: AccountId,
    deleted_at: i64,
) -> RepoResult<usize> {
    let mut changed = 0;
    for relation in Relation::ALL {
        let RelationKind::ManyToMany {
            pivot_table,
            parent_key,
            soft_deletes: true,
            ..
        } = relation.kind()
        else {
            continue;
        };
        changed += conn.execute(
            &format!(
                "UPDATE {pivot_table}
                 SET deleted_at = ?2, updated_at = ?2
                 WHERE {parent_key} = ?1 AND deleted_at IS NULL;"
            ),
            params![account_id, deleted_at],
        )?;
    }
    Ok(changed)
}

/// Revives pivot rows tombstoned together with the account.
///
/// Rows detached earlier carry a different timestamp and stay trashed.
pub(crate) fn cascade_restore(
    conn: &Connection,
    account_id: AccountId,
    deleted_at: i64,
    now_ms: i64,
) -> RepoResult<usize> {
    let mut changed = 0;
    for relation in Relation::ALL {
        let RelationKind::ManyToMany {
            pivot_table,
            parent_key,
            soft_deletes: true,
            ..
        } = relation.kind()
        else {
            continue;
        };
        changed += conn.execute(
            &format!(
                "UPDATE {pivot_table}
                 SET deleted_at = NULL, updated_at = ?3
                 WHERE {parent_key} = ?1 AND deleted_at = ?2;"
            ),
            params![account_id, deleted_at, now_ms],
        )?;
    }
    Ok(changed)
}

/// Deletes rows that reference the account without a foreign key, which
/// SQLite cannot cascade.
pub(crate) fn purge_polymorphic(conn: &Connection, account_id: AccountId) -> RepoResult<usize> {
    let mut changed = 0;
    for relation in Relation::ALL {
        let RelationKind::Polymorphic {
            kind_column,
            id_column,
            related_table,
            owner,
        } = relation.kind()
        else {
            continue;
        };
        changed += conn.execute(
            &format!("DELETE FROM {related_table} WHERE {kind_column} = ?1 AND {id_column} = ?2;"),
            params![owner.as_str(), account_id],
        )?;
    }
    Ok(changed)
}

/// Records or replaces the polymorphic cancellation of an owner.
pub(crate) fn upsert_cancellation(
    conn: &Connection,
    owner: OwnerKind,
    owner_id: i64,
    reason: Option<&str>,
    cancelled_at: i64,
) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO cancellations (owner_kind, owner_id, reason, cancelled_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (owner_kind, owner_id)
         DO UPDATE SET reason = excluded.reason, cancelled_at = excluded.cancelled_at;",
        params![owner.as_str(), owner_id, reason, cancelled_at],
    )?;
    Ok(())
}
