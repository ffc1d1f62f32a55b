use chargeline_core::db::open_db;
use chargeline_core::{
    AccountValidationError, AttributeInput, CodeGenerator, CodeRegistry, CodeResult, RepoError,
    Repository, SequentialSuffix, SqliteAccountRepository, UniqueKey,
};

/// Registry that never sees a taken code, leaving the unique index to catch it.
struct StaleRegistry;

impl CodeRegistry for StaleRegistry {
    fn code_in_use(&self, _collection: &str, _code: &str) -> CodeResult<bool> {
        Ok(false)
    }
}

fn registration(email: &str) -> AttributeInput {
    AttributeInput::new()
        .with("name", "user")
        .with("email", email)
        .with("city_code", "131-01")
}

#[test]
fn code_embeds_prefix_region_and_padded_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(dir.path().join("codes.sqlite3")).unwrap();
    let repo = SqliteAccountRepository::try_new(&conn)
        .unwrap()
        .with_code_generator(CodeGenerator::new(
            Box::new(SequentialSuffix::starting_at(42)),
            4,
        ));

    let account = repo.create(&registration("first@example.com")).unwrap();
    assert_eq!(account.code, "TCU131010042");
    assert_eq!(account.code.len(), 12);
}

#[test]
fn repositories_sharing_a_database_never_hand_out_the_same_code() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("codes.sqlite3");
    let first_conn = open_db(&path).unwrap();
    let second_conn = open_db(&path).unwrap();

    let first = SqliteAccountRepository::try_new(&first_conn)
        .unwrap()
        .with_code_generator(CodeGenerator::new(
            Box::new(SequentialSuffix::starting_at(7)),
            4,
        ));
    let second = SqliteAccountRepository::try_new(&second_conn)
        .unwrap()
        .with_code_generator(CodeGenerator::new(
            Box::new(SequentialSuffix::starting_at(7)),
            4,
        ));

    let a = first.create(&registration("a@example.com")).unwrap();
    let b = second.create(&registration("b@example.com")).unwrap();

    assert_eq!(a.code, "TCU131010007");
    assert_eq!(b.code, "TCU131010008");
    assert_eq!(
        first
            .find_by_unique_key(&UniqueKey::Code(b.code.clone()))
            .unwrap()
            .unwrap()
            .id,
        b.id
    );
}

#[test]
fn trashed_accounts_keep_their_code_reserved() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(dir.path().join("codes.sqlite3")).unwrap();
    let make_repo = || {
        SqliteAccountRepository::try_new(&conn)
            .unwrap()
            .with_code_generator(CodeGenerator::new(
                Box::new(SequentialSuffix::starting_at(1)),
                4,
            ))
    };

    let original = make_repo().create(&registration("a@example.com")).unwrap();
    make_repo().destroy(original.id).unwrap();
    let next = make_repo().create(&registration("b@example.com")).unwrap();

    assert_ne!(next.code, original.code);
}

#[test]
fn exhausted_code_space_fails_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(dir.path().join("codes.sqlite3")).unwrap();
    let make_repo = || {
        SqliteAccountRepository::try_new(&conn)
            .unwrap()
            .with_code_generator(CodeGenerator::new(
                Box::new(SequentialSuffix::starting_at(3)),
                1,
            ))
    };

    make_repo().create(&registration("a@example.com")).unwrap();
    let err = make_repo()
        .create(&registration("b@example.com"))
        .unwrap_err();
    assert!(err.to_string().contains("no free code"), "{err}");

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM accounts;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn insert_conflict_on_code_is_retried_with_a_fresh_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(dir.path().join("codes.sqlite3")).unwrap();
    let first = SqliteAccountRepository::try_new(&conn)
        .unwrap()
        .with_code_generator(CodeGenerator::new(
            Box::new(SequentialSuffix::starting_at(7)),
            4,
        ));
    let racing = SqliteAccountRepository::try_new(&conn)
        .unwrap()
        .with_code_generator(CodeGenerator::new(
            Box::new(SequentialSuffix::starting_at(7)),
            4,
        ))
        .with_code_registry(Box::new(StaleRegistry));

    let kept = first.create(&registration("a@example.com")).unwrap();
    let retried = racing.create(&registration("b@example.com")).unwrap();

    assert_eq!(kept.code, "TCU131010007");
    assert_eq!(retried.code, "TCU131010008");
}

#[test]
fn insert_conflicts_past_the_attempt_limit_fail_cleanly() {
    let conn = chargeline_core::db::open_db_in_memory().unwrap();
    let first = SqliteAccountRepository::try_new(&conn)
        .unwrap()
        .with_code_generator(CodeGenerator::new(
            Box::new(SequentialSuffix::starting_at(7)),
            1,
        ));
    first.create(&registration("a@example.com")).unwrap();

    let racing = SqliteAccountRepository::try_new(&conn)
        .unwrap()
        .with_code_generator(CodeGenerator::new(
            Box::new(SequentialSuffix::starting_at(7)),
            1,
        ))
        .with_code_registry(Box::new(StaleRegistry));
    let err = racing.create(&registration("b@example.com")).unwrap_err();
    assert!(matches!(err, RepoError::Code(_)), "{err}");

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM accounts;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn oversized_region_is_rejected_as_invalid_input() {
    let conn = chargeline_core::db::open_db_in_memory().unwrap();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();

    let err = repo
        .create(
            &AttributeInput::new()
                .with("name", "user")
                .with("email", "long@example.com")
                .with("city_code", "131011234"),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(AccountValidationError::RegionTooLong("city_code"))
    ));

    let fits = repo
        .create(
            &AttributeInput::new()
                .with("name", "user")
                .with("email", "fits@example.com")
                .with("city_code", "13101123"),
        )
        .unwrap();
    assert_eq!(fits.code.len(), 12);
    assert!(fits.code.starts_with("TCU13101123"));
}
