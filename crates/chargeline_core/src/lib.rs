//! Account persistence core for the Chargeline EV charging service.
//! Business invariants for accounts live here and nowhere else.

pub mod code;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;
pub mod search;
pub mod service;

pub use code::{
    CodeError, CodeGenerator, CodeRegistry, CodeRequest, CodeResult, RandomSuffix, SequentialSuffix,
    SuffixSource,
};
pub use config::{AccountRepoConfig, CodeScheme, ConfigError, CoreConfig, PivotCascade};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::account::{Account, AccountId, AccountRelations, Related};
pub use model::attributes::{Attributable, AccountValidationError, AttributeInput};
pub use model::related::ChargerPivotInput;
pub use model::relation::{OwnerKind, Relation};
pub use notify::{LogNotifier, PasswordResetNotifier};
pub use repo::{
    RelationLoader, RepoError, RepoResult, Repository, SoftDeletes, SqliteAccountRepository,
    UniqueKey,
};
pub use search::scope::{
    AccountColumn, AccountScope, AccountSearch, Scope, SortDirection, Trashed,
};
pub use service::account_service::{AccountService, AccountServiceError};

/// Minimal health-check API for probes.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
