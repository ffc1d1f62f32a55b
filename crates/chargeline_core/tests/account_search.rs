use chargeline_core::db::open_db_in_memory;
use chargeline_core::{
    Account, AccountColumn, AccountScope, AccountSearch, AttributeInput, Repository, Scope,
    SortDirection, SqliteAccountRepository,
};
use serde_json::json;

fn seed(repo: &SqliteAccountRepository<'_>) -> Vec<Account> {
    [
        json!({ "name": "Yamada", "email": "yamada@example.com", "city": "Shibuya", "using_app": true }),
        json!({ "name": "Suzuki", "email": "suzuki@example.com", "city": "Minato", "status_id": 2 }),
        json!({ "name": "Tanaka", "email": "tanaka@corp.example", "city": "Shibuya" }),
        json!({ "name": "Sato", "email": "sato@example.com", "phone": "03-1234" }),
    ]
    .into_iter()
    .map(|value| {
        repo.create(&AttributeInput::from_json(value).unwrap())
            .unwrap()
    })
    .collect()
}

fn names(accounts: &[Account]) -> Vec<&str> {
    accounts.iter().map(|account| account.name.as_str()).collect()
}

#[test]
fn default_search_returns_active_rows_by_primary_key() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();
    let seeded = seed(&repo);
    repo.destroy(seeded[1].id).unwrap();

    let found = repo.search(&AccountSearch::new()).unwrap();
    assert_eq!(names(&found), vec!["Yamada", "Tanaka", "Sato"]);
    assert_eq!(repo.count(&AccountSearch::new()).unwrap(), 3);
}

#[test]
fn trashed_filter_selects_soft_deleted_rows() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();
    let seeded = seed(&repo);
    repo.destroy(seeded[1].id).unwrap();

    let only = repo.search(&AccountSearch::new().only_trashed()).unwrap();
    assert_eq!(names(&only), vec!["Suzuki"]);
    assert_eq!(
        repo.count(&AccountSearch::new().with_trashed()).unwrap(),
        4
    );
}

#[test]
fn scopes_compose_with_bound_values() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();
    seed(&repo);

    let shibuya_app_users = AccountSearch::new()
        .scope(AccountScope::equals(AccountColumn::City, "Shibuya"))
        .scope(AccountScope::equals(AccountColumn::UsingApp, true));
    assert_eq!(names(&repo.search(&shibuya_app_users).unwrap()), vec!["Yamada"]);

    let either = AccountSearch::new().scope(
        AccountScope::equals(AccountColumn::StatusId, 2_i64)
            .or(Scope::IsNull(AccountColumn::City)),
    );
    assert_eq!(names(&repo.search(&either).unwrap()), vec!["Suzuki", "Sato"]);

    let not_shibuya = AccountSearch::new()
        .scope(AccountScope::equals(AccountColumn::City, "Shibuya").negate());
    assert_eq!(
        names(&repo.search(&not_shibuya).unwrap()),
        vec!["Suzuki"],
        "NULL city is neither equal nor unequal"
    );
}

#[test]
fn contains_and_keyword_are_case_insensitive() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();
    seed(&repo);

    let corp = AccountSearch::new().scope(AccountScope::contains(AccountColumn::Email, "CORP"));
    assert_eq!(names(&repo.search(&corp).unwrap()), vec!["Tanaka"]);

    let keyword = AccountSearch::new().scope(AccountScope::keyword("shibuya"));
    assert_eq!(
        names(&repo.search(&keyword).unwrap()),
        vec!["Yamada", "Tanaka"]
    );

    let by_phone = AccountSearch::new().scope(AccountScope::keyword("03-12"));
    assert_eq!(names(&repo.search(&by_phone).unwrap()), vec!["Sato"]);
}

#[test]
fn keyword_text_is_never_interpreted_as_sql() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();
    seed(&repo);

    let hostile = AccountSearch::new().scope(AccountScope::keyword("' OR 1=1 --"));
    assert!(repo.search(&hostile).unwrap().is_empty());
    assert_eq!(repo.count(&AccountSearch::new()).unwrap(), 4);
}

#[test]
fn email_scope_matches_one_account() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();
    seed(&repo);

    let found = repo
        .search(&AccountSearch::new().scope(AccountScope::with_email("SATO@example.com")))
        .unwrap();
    assert_eq!(names(&found), vec!["Sato"]);
}

#[test]
fn ordering_and_pagination() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();
    seed(&repo);

    let by_name = AccountSearch::new().order_by(AccountColumn::Name, SortDirection::Asc);
    assert_eq!(
        names(&repo.search(&by_name).unwrap()),
        vec!["Sato", "Suzuki", "Tanaka", "Yamada"]
    );

    let page = by_name.clone().limit(2).offset(1);
    assert_eq!(names(&repo.search(&page).unwrap()), vec!["Suzuki", "Tanaka"]);
    assert_eq!(repo.count(&page).unwrap(), 4);

    let tail = by_name.offset(3);
    assert_eq!(names(&repo.search(&tail).unwrap()), vec!["Yamada"]);

    let newest_first = AccountSearch::new()
        .order_by(AccountColumn::Id, SortDirection::Desc)
        .limit(1);
    assert_eq!(names(&repo.search(&newest_first).unwrap()), vec!["Sato"]);
}

#[test]
fn non_ascii_needles_match_their_own_spelling() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();
    seed(&repo);
    repo.create(&AttributeInput::from_json(json!({ "name": "Émile", "email": "emile@example.com" })).unwrap())
        .unwrap();

    let exact = AccountSearch::new().scope(AccountScope::contains(AccountColumn::Name, "Émile"));
    assert_eq!(names(&repo.search(&exact).unwrap()), vec!["Émile"]);

    let ascii_folded = AccountSearch::new().scope(AccountScope::contains(AccountColumn::Name, "ÉMILE"));
    assert_eq!(names(&repo.search(&ascii_folded).unwrap()), vec!["Émile"]);

    let keyword = AccountSearch::new().scope(AccountScope::keyword("Émi"));
    assert_eq!(repo.count(&keyword).unwrap(), 1);
}
