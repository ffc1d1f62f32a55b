//! Composable search scopes for repository queries.
//!
//! # Responsibility
//! - Express filters as typed predicates over enumerated columns.
//! - Compile predicates into SQL fragments with bound parameters.
//!
//! # Invariants
//! - Caller text is only ever bound, never spliced into SQL.
//! - Column names come from `ScopeColumn::sql_name`, a closed set.
//! - An empty conjunction matches everything; an empty disjunction nothing.

use crate::model::account::Account;
use crate::model::relation::Relation;
use rusqlite::types::Value;

/// Column that scopes may filter and order on.
pub trait ScopeColumn: Copy {
    fn sql_name(self) -> &'static str;
}

/// Capability: an entity with columns eligible for keyword search.
pub trait Searchable {
    type Column: ScopeColumn + 'static;

    fn searchable_columns() -> &'static [Self::Column];
}

/// Filterable and sortable account columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountColumn {
    Id,
    Code,
    Name,
    Email,
    FirstName,
    LastName,
    Phone,
    ZipCode,
    CityCode,
    City,
    PrefectureCode,
    Prefecture,
    Address,
    BuildingName,
    StatusId,
    CreditCardId,
    IsCheckedTutorial,
    UsingApp,
    CreatedAt,
    UpdatedAt,
}

impl ScopeColumn for AccountColumn {
    fn sql_name(self) -> &'static str {
        match self {
            Self::Id => "accounts.id",
            Self::Code => "accounts.code",
            Self::Name => "accounts.name",
            Self::Email => "accounts.email",
            Self::FirstName => "accounts.first_name",
            Self::LastName => "accounts.last_name",
            Self::Phone => "accounts.phone",
            Self::ZipCode => "accounts.zip_code",
            Self::CityCode => "accounts.city_code",
            Self::City => "accounts.city",
            Self::PrefectureCode => "accounts.prefecture_code",
            Self::Prefecture => "accounts.prefecture",
            Self::Address => "accounts.address",
            Self::BuildingName => "accounts.building_name",
            Self::StatusId => "accounts.status_id",
            Self::CreditCardId => "accounts.credit_card_id",
            Self::IsCheckedTutorial => "accounts.is_checked_tutorial",
            Self::UsingApp => "accounts.using_app",
            Self::CreatedAt => "accounts.created_at",
            Self::UpdatedAt => "accounts.updated_at",
        }
    }
}

impl Searchable for Account {
    type Column = AccountColumn;

    fn searchable_columns() -> &'static [AccountColumn] {
        &[
            AccountColumn::Code,
            AccountColumn::Name,
            AccountColumn::Email,
            AccountColumn::FirstName,
            AccountColumn::LastName,
            AccountColumn::Phone,
            AccountColumn::City,
            AccountColumn::Prefecture,
            AccountColumn::Address,
        ]
    }
}

/// Literal compared against a column.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
}

impl ScopeValue {
    fn to_sql_value(&self) -> Value {
        match self {
            Self::Text(text) => Value::Text(text.clone()),
            Self::Integer(value) => Value::Integer(*value),
            Self::Real(value) => Value::Real(*value),
            Self::Bool(flag) => Value::Integer(i64::from(*flag)),
        }
    }
}

impl From<&str> for ScopeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ScopeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for ScopeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for ScopeValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for ScopeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Composable predicate over one entity's columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Scope<C> {
    Equals(C, ScopeValue),
    /// Substring match, case-insensitive for ASCII letters.
    Contains(C, String),
    IsNull(C),
    /// Substring over every searchable column, case-insensitive for ASCII.
    /// Blank keywords match everything.
    Keyword(String),
    All(Vec<Scope<C>>),
    Any(Vec<Scope<C>>),
    Not(Box<Scope<C>>),
}

impl<C: ScopeColumn> Scope<C> {
    pub fn equals(column: C, value: impl Into<ScopeValue>) -> Self {
        Self::Equals(column, value.into())
    }

    pub fn contains(column: C, needle: impl Into<String>) -> Self {
        Self::Contains(column, needle.into())
    }

    pub fn keyword(text: impl Into<String>) -> Self {
        Self::Keyword(text.into())
    }

    pub fn and(self, other: Self) -> Self {
        match self {
            Self::All(mut scopes) => {
                scopes.push(other);
                Self::All(scopes)
            }
            scope => Self::All(vec![scope, other]),
        }
    }

    pub fn or(self, other: Self) -> Self {
        match self {
            Self::Any(mut scopes) => {
                scopes.push(other);
                Self::Any(scopes)
            }
            scope => Self::Any(vec![scope, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Compiles to a parenthesized SQL predicate, appending bound values.
    pub fn to_sql(&self, keyword_columns: &[C], binds: &mut Vec<Value>) -> String {
        match self {
            Self::Equals(column, value) => {
                binds.push(value.to_sql_value());
                format!("({} = ?)", column.sql_name())
            }
            Self::Contains(column, needle) => {
                // Both sides go through SQLite's `lower()`, which folds ASCII only.
                binds.push(Value::Text(needle.clone()));
                format!("(instr(lower({}), lower(?)) > 0)", column.sql_name())
            }
            Self::IsNull(column) => format!("({} IS NULL)", column.sql_name()),
            Self::Keyword(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return "(1 = 1)".to_string();
                }
                let any = Self::Any(
                    keyword_columns
                        .iter()
                        .map(|column| Self::Contains(*column, text.to_string()))
                        .collect(),
                );
                any.to_sql(keyword_columns, binds)
            }
            Self::All(scopes) => join(scopes, " AND ", "(1 = 1)", keyword_columns, binds),
            Self::Any(scopes) => join(scopes, " OR ", "(1 = 0)", keyword_columns, binds),
            Self::Not(scope) => format!("(NOT {})", scope.to_sql(keyword_columns, binds)),
        }
    }
}

impl Scope<AccountColumn> {
    /// Active-or-not lookup by email, the most common account scope.
    pub fn with_email(email: impl Into<String>) -> Self {
        Self::Equals(AccountColumn::Email, ScopeValue::Text(email.into()))
    }
}

pub type AccountScope = Scope<AccountColumn>;

fn join<C: ScopeColumn>(
    scopes: &[Scope<C>],
    separator: &str,
    empty: &str,
    keyword_columns: &[C],
    binds: &mut Vec<Value>,
) -> String {
    if scopes.is_empty() {
        return empty.to_string();
    }
    let parts: Vec<String> = scopes
        .iter()
        .map(|scope| scope.to_sql(keyword_columns, binds))
        .collect();
    format!("({})", parts.join(separator))
}

/// Which rows a query sees along the soft-delete axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Trashed {
    /// Active rows only.
    #[default]
    Exclude,
    /// Active and soft-deleted rows.
    Include,
    /// Soft-deleted rows only.
    Only,
}

impl Trashed {
    pub fn from_flag(include_trashed: bool) -> Self {
        if include_trashed {
            Self::Include
        } else {
            Self::Exclude
        }
    }

    /// SQL predicate for `column`, or `None` when no filter applies.
    pub fn predicate(self, column: &str) -> Option<String> {
        match self {
            Self::Exclude => Some(format!("{column} IS NULL")),
            Self::Include => None,
            Self::Only => Some(format!("{column} IS NOT NULL")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Criteria for `AccountRepository::search`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountSearch {
    pub scope: Option<AccountScope>,
    pub trashed: Trashed,
    /// Empty means primary key ascending.
    pub order_by: Vec<(AccountColumn, SortDirection)>,
    pub limit: Option<u32>,
    pub offset: u32,
    /// `None` uses the repository's eager relations.
    pub relations: Option<Vec<Relation>>,
}

impl AccountSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a scope, AND-ed with any existing one.
    pub fn scope(mut self, scope: AccountScope) -> Self {
        self.scope = Some(match self.scope.take() {
            Some(existing) => existing.and(scope),
            None => scope,
        });
        self
    }

    pub fn with_trashed(mut self) -> Self {
        self.trashed = Trashed::Include;
        self
    }

    pub fn only_trashed(mut self) -> Self {
        self.trashed = Trashed::Only;
        self
    }

    pub fn order_by(mut self, column: AccountColumn, direction: SortDirection) -> Self {
        self.order_by.push((column, direction));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn relations(mut self, relations: Vec<Relation>) -> Self {
        self.relations = Some(relations);
        self
    }

    pub fn without_relations(self) -> Self {
        self.relations(Vec::new())
    }

    /// Builds `WHERE`, `ORDER BY` and pagination clauses.
    pub(crate) fn to_sql_clauses(&self, binds: &mut Vec<Value>) -> String {
        let mut predicates = Vec::new();
        if let Some(trashed) = self.trashed.predicate("accounts.deleted_at") {
            predicates.push(trashed);
        }
        if let Some(scope) = &self.scope {
            predicates.push(scope.to_sql(Account::searchable_columns(), binds));
        }

        let mut sql = String::new();
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        sql.push_str(&self.order_clause());

        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            binds.push(Value::Integer(i64::from(limit)));
            if self.offset > 0 {
                sql.push_str(" OFFSET ?");
                binds.push(Value::Integer(i64::from(self.offset)));
            }
        } else if self.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            binds.push(Value::Integer(i64::from(self.offset)));
        }
        sql
    }

    /// Builds the `WHERE` clause only, for counts.
    pub(crate) fn to_sql_filter(&self, binds: &mut Vec<Value>) -> String {
        let unpaged = Self {
            order_by: Vec::new(),
            limit: None,
            offset: 0,
            ..self.clone()
        };
        let clauses = unpaged.to_sql_clauses(binds);
        clauses
            .strip_suffix(&unpaged.order_clause())
            .unwrap_or(&clauses)
            .to_string()
    }

    fn order_clause(&self) -> String {
        let mut terms: Vec<String> = self
            .order_by
            .iter()
            .map(|(column, direction)| format!("{} {}", column.sql_name(), direction.as_sql()))
            .collect();
        if !self
            .order_by
            .iter()
            .any(|(column, _)| *column == AccountColumn::Id)
        {
            terms.push("accounts.id ASC".to_string());
        }
        format!(" ORDER BY {}", terms.join(", "))
    }
}
