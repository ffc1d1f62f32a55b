//! Account use-case service.
//!
//! # Responsibility
//! - Provide registration, profile and lifecycle entry points for callers.
//! - Dispatch password-reset notifications through the notifier seam.
//!
//! # Invariants
//! - Every write goes through the repository contract.
//! - The service stays storage-agnostic.
//! - Reset dispatch does not reveal whether an address is registered.

use crate::model::account::{Account, AccountId};
use crate::model::attributes::AttributeInput;
use crate::notify::{LogNotifier, PasswordResetNotifier};
use crate::repo::account_repo::UniqueKey;
use crate::repo::base::{RepoError, Repository, SoftDeletes};
use crate::search::scope::{AccountSearch, Trashed};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Repository shape the account service runs on.
pub trait AccountRepository:
    Repository<
        Entity = Account,
        Id = AccountId,
        Key = UniqueKey,
        Input = AttributeInput,
        Criteria = AccountSearch,
    > + SoftDeletes
{
}

impl<T> AccountRepository for T where
    T: Repository<
            Entity = Account,
            Id = AccountId,
            Key = UniqueKey,
            Input = AttributeInput,
            Criteria = AccountSearch,
        > + SoftDeletes
{
}

pub type ServiceResult<T> = Result<T, AccountServiceError>;

#[derive(Debug)]
pub enum AccountServiceError {
    AccountNotFound(AccountId),
    /// Purge requested for an account that is still active.
    NotTrashed(AccountId),
    Repo(RepoError),
}

impl Display for AccountServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccountNotFound(id) => write!(f, "account not found: {id}"),
            Self::NotTrashed(id) => write!(f, "account {id} must be withdrawn before purge"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for AccountServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for AccountServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::AccountNotFound(id),
            other => Self::Repo(other),
        }
    }
}

/// Use-case wrapper over an account repository.
pub struct AccountService<R: AccountRepository, N: PasswordResetNotifier = LogNotifier> {
    repo: R,
    notifier: N,
}

impl<R: AccountRepository> AccountService<R> {
    /// Creates a service that logs reset dispatches.
    pub fn new(repo: R) -> Self {
        Self::with_notifier(repo, LogNotifier)
    }
}

impl<R: AccountRepository, N: PasswordResetNotifier> AccountService<R, N> {
    pub fn with_notifier(repo: R, notifier: N) -> Self {
        Self { repo, notifier }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Registers an account; the business code is assigned here.
    pub fn register(&self, input: &AttributeInput) -> ServiceResult<Account> {
        Ok(self.repo.create(input)?)
    }

    /// Loads an active account or fails with `AccountNotFound`.
    pub fn get(&self, id: AccountId) -> ServiceResult<Account> {
        self.repo
            .find(id, Trashed::Exclude)?
            .ok_or(AccountServiceError::AccountNotFound(id))
    }

    pub fn find_by_email(&self, email: &str) -> ServiceResult<Option<Account>> {
        Ok(self
            .repo
            .find_by_unique_key(&UniqueKey::Email(email.to_string()))?)
    }

    pub fn find_by_code(&self, code: &str) -> ServiceResult<Option<Account>> {
        Ok(self
            .repo
            .find_by_unique_key(&UniqueKey::Code(code.to_string()))?)
    }

    /// Applies a partial profile update. Absent keys are left untouched.
    pub fn update_profile(&self, id: AccountId, input: &AttributeInput) -> ServiceResult<Account> {
        Ok(self.repo.update(input, id)?)
    }

    /// Soft-deletes an active account.
    pub fn withdraw(&self, id: AccountId) -> ServiceResult<()> {
        match self.repo.destroy(id)? {
            0 => Err(AccountServiceError::AccountNotFound(id)),
            _ => Ok(()),
        }
    }

    /// Brings a withdrawn account back and returns it.
    pub fn restore(&self, id: AccountId) -> ServiceResult<Account> {
        if self.repo.restore(id)? == 0 {
            return Err(AccountServiceError::AccountNotFound(id));
        }
        self.get(id)
    }

    /// Permanently removes a withdrawn account.
    pub fn purge(&self, id: AccountId) -> ServiceResult<()> {
        if self.repo.force_delete(id)? == 1 {
            return Ok(());
        }
        match self.repo.find(id, Trashed::Exclude)? {
            Some(_) => Err(AccountServiceError::NotTrashed(id)),
            None => Err(AccountServiceError::AccountNotFound(id)),
        }
    }

    pub fn search(&self, criteria: &AccountSearch) -> ServiceResult<Vec<Account>> {
        Ok(self.repo.search(criteria)?)
    }

    pub fn count(&self, criteria: &AccountSearch) -> ServiceResult<u64> {
        Ok(self.repo.count(criteria)?)
    }

    /// Hands `token` to the notifier when `email` belongs to an active account.
    ///
    /// Returns whether a notification was dispatched.
    pub fn send_password_reset(&self, email: &str, token: &str) -> ServiceResult<bool> {
        let Some(account) = self.find_by_email(email)? else {
            return Ok(false);
        };
        self.notifier.send_password_reset(token, &account.email);
        Ok(true)
    }
}
