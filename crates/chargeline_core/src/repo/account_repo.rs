//! Account repository over SQLite.
//!
//! # Responsibility
//! - Implement the generic `Repository` contract for `accounts`.
//! - Generate the business code as an explicit step of `create`.
//! - Apply soft-delete semantics and the configured pivot cascade.
//!
//! # Invariants
//! - Writes filter input through `Attributable::FILLABLE` before SQL.
//! - Multi-statement writes run in one immediate transaction.
//! - `code` is written once by `create` and never updated.
//! - Default reads see active rows only.

use crate::code::{CodeError, CodeGenerator, CodeRegistry, RandomSuffix};
use crate::config::{AccountRepoConfig, PivotCascade};
use crate::db::now_epoch_ms;
use crate::model::account::{Account, AccountId};
use crate::model::attributes::{AccountPatch, AccountValidationError, AttributeInput};
use crate::model::credential::hash_password;
use crate::model::related::ChargerPivotInput;
use crate::model::relation::{OwnerKind, Relation};
use crate::repo::base::{
    bool_to_int, ensure_connection_ready, int_to_bool, RepoError, RepoResult, Repository,
    SoftDeletes,
};
use crate::repo::relation_repo::{self, RelationLoader};
use crate::search::scope::{AccountSearch, Trashed};
use log::{debug, info};
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use std::time::Instant;

const ACCOUNT_SELECT_SQL: &str = "SELECT
    accounts.id,
    accounts.code,
    accounts.name,
    accounts.email,
    accounts.email_verified_at,
    accounts.password_hash,
    accounts.remember_token,
    accounts.first_name,
    accounts.last_name,
    accounts.phone,
    accounts.zip_code,
    accounts.city_code,
    accounts.city,
    accounts.prefecture_code,
    accounts.prefecture,
    accounts.address,
    accounts.building_name,
    accounts.latitude,
    accounts.longitude,
    accounts.is_checked_tutorial,
    accounts.using_app,
    accounts.status_id,
    accounts.credit_card_id,
    accounts.created_at,
    accounts.updated_at,
    accounts.deleted_at
FROM accounts";

const REQUIRED_TABLES: &[(&str, &[&str])] = &[
    (
        "accounts",
        &["id", "code", "email", "status_id", "credit_card_id", "deleted_at"],
    ),
    ("account_statuses", &["id", "name"]),
    ("place_accounts", &["place_id", "account_id"]),
    ("charger_accounts", &["id", "charger_id", "account_id", "deleted_at"]),
    ("cancellations", &["owner_kind", "owner_id"]),
];

/// Unique lookup keys of an active account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniqueKey {
    /// Matched case-insensitively.
    Email(String),
    Code(String),
}

/// SQLite-backed account repository.
pub struct SqliteAccountRepository<'conn> {
    conn: &'conn Connection,
    config: AccountRepoConfig,
    codes: CodeGenerator,
    /// Collision lookup; the write transaction itself when unset.
    registry: Option<Box<dyn CodeRegistry + 'conn>>,
}

impl<'conn> SqliteAccountRepository<'conn> {
    /// Constructs a repository with default settings from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        Self::with_config(conn, AccountRepoConfig::default())
    }

    pub fn with_config(conn: &'conn Connection, config: AccountRepoConfig) -> RepoResult<Self> {
        ensure_connection_ready(conn, REQUIRED_TABLES)?;
        let codes = CodeGenerator::new(Box::new(RandomSuffix), config.code.max_attempts);
        Ok(Self {
            conn,
            config,
            codes,
            registry: None,
        })
    }

    /// Replaces the code generator, e.g. with a sequential suffix source.
    pub fn with_code_generator(mut self, codes: CodeGenerator) -> Self {
        self.codes = codes;
        self
    }

    /// Replaces the lookup used to reject taken codes before insert.
    ///
    /// The `UNIQUE` index on `accounts.code` stays authoritative: a candidate
    /// the registry misses is retried after the insert conflicts.
    pub fn with_code_registry(mut self, registry: Box<dyn CodeRegistry + 'conn>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(&self) -> &AccountRepoConfig {
        &self.config
    }

    pub fn relations(&self) -> RelationLoader<'conn> {
        RelationLoader::new(self.conn)
    }

    /// Like `find`, with an explicit relation set instead of the eager one.
    pub fn find_with(
        &self,
        id: AccountId,
        trashed: Trashed,
        relations: &[Relation],
    ) -> RepoResult<Option<Account>> {
        let Some(mut account) = fetch_account(self.conn, id, trashed)? else {
            return Ok(None);
        };
        self.relations().load(&mut account, relations)?;
        Ok(Some(account))
    }

    /// Links a place to an active account. Returns whether a link was added.
    pub fn attach_place(&self, id: AccountId, place_id: i64) -> RepoResult<bool> {
        ensure_active(self.conn, id)?;
        ensure_reference(self.conn, "places", "place_id", place_id)?;
        relation_repo::attach_place(self.conn, id, place_id)
    }

    pub fn detach_place(&self, id: AccountId, place_id: i64) -> RepoResult<usize> {
        ensure_active(self.conn, id)?;
        relation_repo::detach(self.conn, Relation::Places, id, place_id, now_epoch_ms())
    }

    /// Adds a charger assignment and returns the new pivot id.
    pub fn attach_charger(
        &self,
        id: AccountId,
        charger_id: i64,
        pivot: &ChargerPivotInput,
    ) -> RepoResult<i64> {
        ensure_active(self.conn, id)?;
        ensure_reference(self.conn, "chargers", "charger_id", charger_id)?;
        relation_repo::attach_charger(self.conn, id, charger_id, pivot)
    }

    /// Tombstones the active assignments of one charger.
    pub fn detach_charger(&self, id: AccountId, charger_id: i64) -> RepoResult<usize> {
        ensure_active(self.conn, id)?;
        relation_repo::detach(self.conn, Relation::Chargers, id, charger_id, now_epoch_ms())
    }

    /// Records, or replaces, the cancellation owned by the account.
    pub fn record_cancellation(&self, id: AccountId, reason: Option<&str>) -> RepoResult<()> {
        if fetch_account(self.conn, id, Trashed::Include)?.is_none() {
            return Err(RepoError::NotFound(id));
        }
        relation_repo::upsert_cancellation(
            self.conn,
            OwnerKind::Account,
            id,
            reason,
            now_epoch_ms(),
        )
    }

    /// Stores or clears the persistent-login token.
    pub fn set_remember_token(&self, id: AccountId, token: Option<&str>) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE accounts
             SET remember_token = ?2
             WHERE id = ?1
               AND deleted_at IS NULL;",
            params![id, token],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }
}

impl Repository for SqliteAccountRepository<'_> {
    type Entity = Account;
    type Id = AccountId;
    type Key = UniqueKey;
    type Input = AttributeInput;
    type Criteria = AccountSearch;

    fn create(&self, input: &AttributeInput) -> RepoResult<Account> {
        let started_at = Instant::now();
        let (patch, ignored) = AccountPatch::from_input(input)?;
        log_ignored_keys("create", &ignored);

        let new_account = patch.into_new_account(self.config.default_status_id)?;
        let mut template = new_account.template;
        let request = self.config.code.request(template.city_code.as_deref());
        // Region is caller input, so an oversized one is a validation error.
        match self.codes.compose(&request, 0) {
            Ok(_) => {}
            Err(CodeError::LengthTooShort { .. }) if template.city_code.is_some() => {
                return Err(AccountValidationError::RegionTooLong("city_code").into());
            }
            Err(err) => return Err(err.into()),
        }
        template.password_hash = match &new_account.password {
            Some(password) => {
                Some(hash_password(password).map_err(AccountValidationError::PasswordHash)?)
            }
            None => None,
        };

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_reference(&tx, "account_statuses", "status_id", template.status_id)?;
        if let Some(card_id) = template.credit_card_id {
            ensure_reference(&tx, "credit_cards", "credit_card_id", card_id)?;
        }
        if email_taken(&tx, &template.email, None)? {
            return Err(RepoError::Conflict { field: "email" });
        }

        let registry: &dyn CodeRegistry = match &self.registry {
            Some(registry) => &**registry,
            None => &*tx,
        };
        let (_, id) = self.codes.insert_with_unique_code(
            registry,
            &request,
            |code| insert_account(&tx, &template, code),
            |err: &RepoError| matches!(err, RepoError::Conflict { field: "code" }),
        )?;
        tx.commit()?;

        info!(
            "event=account_create module=repo status=ok account_id={id} duration_ms={}",
            started_at.elapsed().as_millis()
        );
        self.find_with(id, Trashed::Exclude, &self.config.eager_relations)?
            .ok_or(RepoError::NotFound(id))
    }

    fn find_by_unique_key(&self, key: &UniqueKey) -> RepoResult<Option<Account>> {
        let (column, value) = match key {
            UniqueKey::Email(email) => ("email", email.trim()),
            UniqueKey::Code(code) => ("code", code.trim()),
        };
        let sql = format!(
            "{ACCOUNT_SELECT_SQL}
             WHERE accounts.{column} = ?1
               AND accounts.deleted_at IS NULL;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([value])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let mut account = parse_account_row(row)?;
        self.relations()
            .load(&mut account, &self.config.eager_relations)?;
        Ok(Some(account))
    }

    fn find(&self, id: AccountId, trashed: Trashed) -> RepoResult<Option<Account>> {
        self.find_with(id, trashed, &self.config.eager_relations)
    }

    fn update(&self, input: &AttributeInput, id: AccountId) -> RepoResult<Account> {
        let (patch, ignored) = AccountPatch::from_input(input)?;
        log_ignored_keys("update", &ignored);
        let password_hash = match &patch.password {
            Some(password) => {
                Some(hash_password(password).map_err(AccountValidationError::PasswordHash)?)
            }
            None => None,
        };

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut account = fetch_account(&tx, id, Trashed::Exclude)?.ok_or(RepoError::NotFound(id))?;

        if !patch.is_empty() {
            patch.apply_to(&mut account);
            if let Some(hash) = password_hash {
                account.password_hash = Some(hash);
            }
            if patch.status_id.is_some() {
                ensure_reference(&tx, "account_statuses", "status_id", account.status_id)?;
            }
            if let Some(Some(card_id)) = patch.credit_card_id {
                ensure_reference(&tx, "credit_cards", "credit_card_id", card_id)?;
            }
            if patch.email.is_some() && email_taken(&tx, &account.email, Some(id))? {
                return Err(RepoError::Conflict { field: "email" });
            }
            write_account(&tx, &account, now_epoch_ms())?;
        }
        tx.commit()?;

        debug!("event=account_update module=repo status=ok account_id={id}");
        self.find(id, Trashed::Exclude)?
            .ok_or(RepoError::NotFound(id))
    }

    fn destroy(&self, id: AccountId) -> RepoResult<usize> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let deleted_at = now_epoch_ms();
        let changed = tx.execute(
            "UPDATE accounts
             SET deleted_at = ?2,
                 updated_at = ?2
             WHERE id = ?1
               AND deleted_at IS NULL;",
            params![id, deleted_at],
        )?;

        let mut pivots = 0;
        if changed == 1 && self.config.pivot_cascade == PivotCascade::SoftDelete {
            pivots = relation_repo::cascade_soft_delete(&tx, id, deleted_at)?;
        }
        tx.commit()?;

        info!(
            "event=account_destroy module=repo status=ok account_id={id} changed={changed} pivots={pivots}"
        );
        Ok(changed)
    }

    fn search(&self, criteria: &AccountSearch) -> RepoResult<Vec<Account>> {
        let mut binds = Vec::new();
        let sql = format!("{ACCOUNT_SELECT_SQL}{};", criteria.to_sql_clauses(&mut binds));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut accounts = Vec::new();
        while let Some(row) = rows.next()? {
            accounts.push(parse_account_row(row)?);
        }

        let relations = criteria
            .relations
            .as_deref()
            .unwrap_or(&self.config.eager_relations);
        self.relations().load_many(&mut accounts, relations)?;
        Ok(accounts)
    }

    fn count(&self, criteria: &AccountSearch) -> RepoResult<u64> {
        let mut binds = Vec::new();
        let sql = format!(
            "SELECT COUNT(*) FROM accounts{};",
            criteria.to_sql_filter(&mut binds)
        );
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(binds), |row| row.get(0))?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative account count `{count}`")))
    }
}

impl SoftDeletes for SqliteAccountRepository<'_> {
    fn restore(&self, id: AccountId) -> RepoResult<usize> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let deleted_at: Option<i64> = tx
            .query_row(
                "SELECT deleted_at FROM accounts WHERE id = ?1 AND deleted_at IS NOT NULL;",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(deleted_at) = deleted_at else {
            return Ok(0);
        };

        let email_in_use: i64 = tx.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM accounts other
                WHERE other.email = (SELECT email FROM accounts WHERE id = ?1)
                  AND other.id != ?1
                  AND other.deleted_at IS NULL
            );",
            [id],
            |row| row.get(0),
        )?;
        if email_in_use == 1 {
            return Err(RepoError::Conflict { field: "email" });
        }

        let now = now_epoch_ms();
        tx.execute(
            "UPDATE accounts
             SET deleted_at = NULL,
                 updated_at = ?2
             WHERE id = ?1;",
            params![id, now],
        )?;
        let mut pivots = 0;
        if self.config.pivot_cascade == PivotCascade::SoftDelete {
            pivots = relation_repo::cascade_restore(&tx, id, deleted_at, now)?;
        }
        tx.commit()?;

        info!("event=account_restore module=repo status=ok account_id={id} pivots={pivots}");
        Ok(1)
    }

    fn force_delete(&self, id: AccountId) -> RepoResult<usize> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "DELETE FROM accounts WHERE id = ?1 AND deleted_at IS NOT NULL;",
            [id],
        )?;
        if changed == 1 {
            // Pivots and dependents cascade through foreign keys.
            relation_repo::purge_polymorphic(&tx, id)?;
        }
        tx.commit()?;

        info!("event=account_force_delete module=repo status=ok account_id={id} changed={changed}");
        Ok(changed)
    }
}

fn log_ignored_keys(operation: &str, ignored: &[String]) {
    if !ignored.is_empty() {
        debug!(
            "event=account_{operation} module=repo status=ignored_keys keys={}",
            ignored.join(",")
        );
    }
}

fn fetch_account(
    conn: &Connection,
    id: AccountId,
    trashed: Trashed,
) -> RepoResult<Option<Account>> {
    let mut sql = format!("{ACCOUNT_SELECT_SQL} WHERE accounts.id = ?1");
    if let Some(predicate) = trashed.predicate("accounts.deleted_at") {
        sql.push_str(" AND ");
        sql.push_str(&predicate);
    }
    sql.push(';');

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(parse_account_row(row)?)),
        None => Ok(None),
    }
}

fn ensure_active(conn: &Connection, id: AccountId) -> RepoResult<()> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM accounts WHERE id = ?1 AND deleted_at IS NULL);",
        [id],
        |row| row.get(0),
    )?;
    if exists == 1 {
        Ok(())
    } else {
        Err(RepoError::NotFound(id))
    }
}

fn ensure_reference(
    conn: &Connection,
    table: &'static str,
    attribute: &'static str,
    id: i64,
) -> RepoResult<()> {
    let exists: i64 = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1);"),
        [id],
        |row| row.get(0),
    )?;
    if exists == 1 {
        Ok(())
    } else {
        Err(AccountValidationError::UnknownReference { attribute, id }.into())
    }
}

fn email_taken(conn: &Connection, email: &str, except: Option<AccountId>) -> RepoResult<bool> {
    let taken: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM accounts
            WHERE email = ?1
              AND deleted_at IS NULL
              AND (?2 IS NULL OR id != ?2)
        );",
        params![email, except],
        |row| row.get(0),
    )?;
    Ok(taken == 1)
}

fn insert_account(conn: &Connection, account: &Account, code: &str) -> RepoResult<AccountId> {
    conn.execute(
        "INSERT INTO accounts (
            code,
            name,
            email,
            email_verified_at,
            password_hash,
            remember_token,
            first_name,
            last_name,
            phone,
            zip_code,
            city_code,
            city,
            prefecture_code,
            prefecture,
            address,
            building_name,
            latitude,
            longitude,
            is_checked_tutorial,
            using_app,
            status_id,
            credit_card_id
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
            ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22
        );",
        params![
            code,
            account.name.as_str(),
            account.email.as_str(),
            account.email_verified_at,
            account.password_hash.as_deref(),
            account.remember_token.as_deref(),
            account.first_name.as_deref(),
            account.last_name.as_deref(),
            account.phone.as_deref(),
            account.zip_code.as_deref(),
            account.city_code.as_deref(),
            account.city.as_deref(),
            account.prefecture_code.as_deref(),
            account.prefecture.as_deref(),
            account.address.as_deref(),
            account.building_name.as_deref(),
            account.latitude,
            account.longitude,
            bool_to_int(account.is_checked_tutorial),
            bool_to_int(account.using_app),
            account.status_id,
            account.credit_card_id,
        ],
    )
    .map_err(map_unique_violation)?;
    Ok(conn.last_insert_rowid())
}

/// Writes every mutable column. `code` is never part of an update.
fn write_account(conn: &Connection, account: &Account, now_ms: i64) -> RepoResult<()> {
    conn.execute(
        "UPDATE accounts
         SET
            name = ?2,
            email = ?3,
            password_hash = ?4,
            first_name = ?5,
            last_name = ?6,
            phone = ?7,
            zip_code = ?8,
            city_code = ?9,
            city = ?10,
            prefecture_code = ?11,
            prefecture = ?12,
            address = ?13,
            building_name = ?14,
            latitude = ?15,
            longitude = ?16,
            is_checked_tutorial = ?17,
            using_app = ?18,
            status_id = ?19,
            credit_card_id = ?20,
            updated_at = ?21
         WHERE id = ?1
           AND deleted_at IS NULL;",
        params![
            account.id,
            account.name.as_str(),
            account.email.as_str(),
            account.password_hash.as_deref(),
            account.first_name.as_deref(),
            account.last_name.as_deref(),
            account.phone.as_deref(),
            account.zip_code.as_deref(),
            account.city_code.as_deref(),
            account.city.as_deref(),
            account.prefecture_code.as_deref(),
            account.prefecture.as_deref(),
            account.address.as_deref(),
            account.building_name.as_deref(),
            account.latitude,
            account.longitude,
            bool_to_int(account.is_checked_tutorial),
            bool_to_int(account.using_app),
            account.status_id,
            account.credit_card_id,
            now_ms,
        ],
    )
    .map_err(map_unique_violation)?;
    Ok(())
}

fn map_unique_violation(err: rusqlite::Error) -> RepoError {
    let err = crate::db::DbError::Sqlite(err);
    match err.unique_violation_target() {
        Some("accounts.code") => RepoError::Conflict { field: "code" },
        Some("accounts.email") => RepoError::Conflict { field: "email" },
        _ => RepoError::Db(err),
    }
}

fn parse_account_row(row: &Row<'_>) -> RepoResult<Account> {
    Ok(Account {
        id: row.get("id")?,
        code: row.get("code")?,
        name: row.get("name")?,
        email: row.get("email")?,
        email_verified_at: row.get("email_verified_at")?,
        password_hash: row.get("password_hash")?,
        remember_token: row.get("remember_token")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        phone: row.get("phone")?,
        zip_code: row.get("zip_code")?,
        city_code: row.get("city_code")?,
        city: row.get("city")?,
        prefecture_code: row.get("prefecture_code")?,
        prefecture: row.get("prefecture")?,
        address: row.get("address")?,
        building_name: row.get("building_name")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        is_checked_tutorial: int_to_bool(
            row.get("is_checked_tutorial")?,
            "accounts.is_checked_tutorial",
        )?,
        using_app: int_to_bool(row.get("using_app")?, "accounts.using_app")?,
        status_id: row.get("status_id")?,
        credit_card_id: row.get("credit_card_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
        relations: Default::default(),
    })
}
