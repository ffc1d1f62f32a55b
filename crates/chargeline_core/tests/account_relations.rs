use chargeline_core::db::open_db_in_memory;
use chargeline_core::{
    AccountRepoConfig, AccountSearch, AccountValidationError, AttributeInput, ChargerPivotInput,
    OwnerKind, PivotCascade, Relation, RepoError, Repository, SoftDeletes,
    SqliteAccountRepository, Trashed,
};
use rusqlite::Connection;

fn seeded() -> Connection {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO places (id, name, address) VALUES
            (1, 'Shibuya Hub', 'Shibuya 1-1'),
            (2, 'Ueno Depot', NULL);
         INSERT INTO chargers (id, name, serial_number) VALUES
            (1, 'Fast A', 'SN-A'),
            (2, 'Fast B', 'SN-B');
         INSERT INTO credit_cards (id, brand, last_four) VALUES (3, 'visa', '4242');",
    )
    .unwrap();
    conn
}

fn create(repo: &SqliteAccountRepository<'_>, email: &str) -> i64 {
    repo.create(
        &AttributeInput::new()
            .with("name", "user")
            .with("email", email)
            .with("city_code", "13101"),
    )
    .unwrap()
    .id
}

fn pivot_tombstones(conn: &Connection, account_id: i64) -> Vec<Option<i64>> {
    let mut stmt = conn
        .prepare("SELECT deleted_at FROM charger_accounts WHERE account_id = ?1 ORDER BY id;")
        .unwrap();
    let tombstones = stmt
        .query_map([account_id], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<Option<i64>>, _>>()
        .unwrap();
    tombstones
}

#[test]
fn every_declared_relation_resolves() {
    let conn = seeded();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();
    let id = create(&repo, "user@example.com");
    repo.update(&AttributeInput::new().with("credit_card_id", 3), id)
        .unwrap();
    conn.execute_batch(&format!(
        "INSERT INTO device_tokens (account_id, token, platform) VALUES ({id}, 'dev-token', 'ios');
         INSERT INTO charging_histories (account_id, charger_id, started_at, ended_at, charging_fee)
            VALUES ({id}, 1, 1000, 2000, 550), ({id}, 2, 3000, NULL, 0);
         INSERT INTO personal_notices (account_id, title, body) VALUES ({id}, 'Welcome', 'Hello');"
    ))
    .unwrap();
    repo.attach_place(id, 2).unwrap();
    repo.attach_charger(id, 1, &ChargerPivotInput::default())
        .unwrap();
    repo.record_cancellation(id, None).unwrap();

    let account = repo
        .find_with(id, Trashed::Exclude, &Relation::ALL)
        .unwrap()
        .unwrap();
    let relations = &account.relations;

    assert_eq!(relations.loaded(), Relation::ALL.to_vec());
    assert_eq!(relations.status.get().unwrap().id, 1);
    assert_eq!(
        relations.credit_card.get().unwrap().as_ref().unwrap().last_four,
        "4242"
    );
    assert_eq!(
        relations.device_token.get().unwrap().as_ref().unwrap().platform,
        "ios"
    );
    let histories = relations.charging_histories.get().unwrap();
    assert_eq!(histories.len(), 2);
    assert!(histories[0].id < histories[1].id);
    assert_eq!(histories[1].ended_at, None);
    assert!(!relations.notices.get().unwrap()[0].is_read);
    assert_eq!(relations.places.get().unwrap()[0].place.name, "Ueno Depot");
    assert_eq!(relations.chargers.get().unwrap()[0].charger.serial_number, "SN-A");
    let cancellation = relations.cancellation.get().unwrap().as_ref().unwrap();
    assert_eq!(cancellation.owner.kind, OwnerKind::Account);
    assert_eq!(cancellation.owner.id, id);

    assert_eq!(
        account.payment_member_id(),
        Some(format!("GM{}00000003", account.code))
    );
}

#[test]
fn relation_loader_accessors_match_eager_loading() {
    let conn = seeded();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();
    let id = create(&repo, "user@example.com");
    repo.attach_place(id, 1).unwrap();
    repo.attach_place(id, 2).unwrap();

    let account = repo.find(id, Trashed::Exclude).unwrap().unwrap();
    let loader = repo.relations();
    assert_eq!(loader.places(&account).unwrap(), *account.relations.places.get().unwrap());
    assert_eq!(loader.credit_card(&account).unwrap(), None);
    assert_eq!(loader.device_token(&account).unwrap(), None);
    assert!(loader.notices(&account).unwrap().is_empty());
}

#[test]
fn place_links_are_idempotent_and_detachable() {
    let conn = seeded();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();
    let id = create(&repo, "user@example.com");

    assert!(repo.attach_place(id, 1).unwrap());
    assert!(!repo.attach_place(id, 1).unwrap());
    assert_eq!(repo.detach_place(id, 1).unwrap(), 1);
    assert_eq!(repo.detach_place(id, 1).unwrap(), 0);

    let err = repo.attach_place(id, 99).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(AccountValidationError::UnknownReference {
            attribute: "place_id",
            id: 99
        })
    ));
}

#[test]
fn charger_pivot_carries_attributes_and_tombstone() {
    let conn = seeded();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();
    let id = create(&repo, "user@example.com");

    let pivot_id = repo
        .attach_charger(
            id,
            2,
            &ChargerPivotInput {
                charging_fee: 1200,
                order_id: Some("ORD-77".to_string()),
            },
        )
        .unwrap();
    let account = repo
        .find_with(id, Trashed::Exclude, &[Relation::Chargers])
        .unwrap()
        .unwrap();
    let assignment = &account.relations.chargers.get().unwrap()[0];
    assert_eq!(assignment.pivot.id, pivot_id);
    assert_eq!(assignment.pivot.charging_fee, 1200);
    assert_eq!(assignment.pivot.order_id.as_deref(), Some("ORD-77"));
    assert!(!assignment.pivot.is_trashed());

    assert_eq!(repo.detach_charger(id, 2).unwrap(), 1);
    let loader = repo.relations();
    assert!(loader.chargers(&account, false).unwrap().is_empty());
    assert!(loader.chargers(&account, true).unwrap()[0].pivot.is_trashed());
}

#[test]
fn pivot_maintenance_requires_active_account() {
    let conn = seeded();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();
    let id = create(&repo, "user@example.com");
    repo.destroy(id).unwrap();

    assert!(matches!(repo.attach_place(id, 1), Err(RepoError::NotFound(_))));
    assert!(matches!(
        repo.attach_charger(id, 1, &ChargerPivotInput::default()),
        Err(RepoError::NotFound(_))
    ));
}

#[test]
fn soft_delete_cascades_to_charger_pivots_and_restore_revives_them() {
    let conn = seeded();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();
    let id = create(&repo, "user@example.com");
    repo.attach_place(id, 1).unwrap();
    repo.attach_charger(id, 1, &ChargerPivotInput::default())
        .unwrap();
    repo.attach_charger(id, 2, &ChargerPivotInput::default())
        .unwrap();
    repo.detach_charger(id, 2).unwrap();
    conn.execute(
        "UPDATE charger_accounts SET deleted_at = 1000 WHERE account_id = ?1 AND charger_id = 2;",
        [id],
    )
    .unwrap();
    let detached_at = Some(1000);

    repo.destroy(id).unwrap();
    let trashed = repo.find(id, Trashed::Include).unwrap().unwrap();
    let tombstones = pivot_tombstones(&conn, id);
    assert_eq!(tombstones[0], trashed.deleted_at);
    assert_eq!(tombstones[1], detached_at);
    assert_eq!(trashed.relations.places.get().unwrap().len(), 1);

    repo.restore(id).unwrap();
    let tombstones = pivot_tombstones(&conn, id);
    assert_eq!(tombstones[0], None);
    assert!(tombstones[1].is_some());
}

#[test]
fn retain_policy_leaves_pivots_active() {
    let conn = seeded();
    let config = AccountRepoConfig {
        pivot_cascade: PivotCascade::Retain,
        ..AccountRepoConfig::default()
    };
    let repo = SqliteAccountRepository::with_config(&conn, config).unwrap();
    let id = create(&repo, "user@example.com");
    repo.attach_charger(id, 1, &ChargerPivotInput::default())
        .unwrap();

    repo.destroy(id).unwrap();
    assert_eq!(pivot_tombstones(&conn, id), vec![None]);
}

#[test]
fn purge_removes_pivots_and_dependents() {
    let conn = seeded();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();
    let id = create(&repo, "user@example.com");
    repo.attach_place(id, 1).unwrap();
    repo.attach_charger(id, 1, &ChargerPivotInput::default())
        .unwrap();
    conn.execute(
        "INSERT INTO personal_notices (account_id, title, body) VALUES (?1, 't', 'b');",
        [id],
    )
    .unwrap();

    repo.destroy(id).unwrap();
    repo.force_delete(id).unwrap();

    for table in ["place_accounts", "charger_accounts", "personal_notices"] {
        let remaining: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE account_id = ?1;"),
                [id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(remaining, 0, "{table} still references purged account");
    }
    let places: i64 = conn
        .query_row("SELECT COUNT(*) FROM places;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(places, 2);
}

#[test]
fn search_can_override_eager_relations() {
    let conn = seeded();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();
    create(&repo, "user@example.com");

    let eager = repo.search(&AccountSearch::new()).unwrap();
    assert_eq!(
        eager[0].relations.loaded(),
        vec![Relation::Status, Relation::Places]
    );

    let bare = repo
        .search(&AccountSearch::new().without_relations())
        .unwrap();
    assert!(bare[0].relations.loaded().is_empty());

    let custom = repo
        .search(&AccountSearch::new().relations(vec![Relation::Cancellation]))
        .unwrap();
    assert_eq!(custom[0].relations.loaded(), vec![Relation::Cancellation]);
    assert_eq!(custom[0].relations.cancellation.get(), Some(&None));
}

#[test]
fn search_distributes_batched_relations_to_each_account() {
    let conn = seeded();
    let repo = SqliteAccountRepository::try_new(&conn).unwrap();
    let first = create(&repo, "first@example.com");
    let second = create(&repo, "second@example.com");
    let third = create(&repo, "third@example.com");

    repo.update(&AttributeInput::new().with("credit_card_id", 3), second)
        .unwrap();
    repo.update(&AttributeInput::new().with("status_id", 2), third)
        .unwrap();
    repo.attach_place(first, 2).unwrap();
    repo.attach_place(first, 1).unwrap();
    repo.attach_place(third, 1).unwrap();
    repo.attach_charger(second, 2, &ChargerPivotInput::default())
        .unwrap();
    repo.record_cancellation(third, Some("moved")).unwrap();
    conn.execute_batch(&format!(
        "INSERT INTO personal_notices (account_id, title, body) VALUES
            ({second}, 'b', 'second'), ({first}, 'a', 'first'), ({second}, 'c', 'second');"
    ))
    .unwrap();

    let accounts = repo
        .search(&AccountSearch::new().relations(Relation::ALL.to_vec()))
        .unwrap();
    assert_eq!(
        accounts.iter().map(|account| account.id).collect::<Vec<_>>(),
        vec![first, second, third]
    );
    let [a, b, c] = accounts.as_slice() else {
        panic!("expected three accounts");
    };

    assert_eq!(a.relations.status.get().unwrap().name, "active");
    assert_eq!(c.relations.status.get().unwrap().name, "suspended");

    assert_eq!(a.relations.credit_card.get(), Some(&None));
    assert_eq!(
        b.relations.credit_card.get().unwrap().as_ref().unwrap().id,
        3
    );

    let place_ids = |account: &chargeline_core::Account| {
        account
            .relations
            .places
            .get()
            .unwrap()
            .iter()
            .map(|membership| membership.place.id)
            .collect::<Vec<_>>()
    };
    assert_eq!(place_ids(a), vec![1, 2]);
    assert!(place_ids(b).is_empty());
    assert_eq!(place_ids(c), vec![1]);

    assert_eq!(b.relations.chargers.get().unwrap()[0].charger.id, 2);
    assert!(a.relations.chargers.get().unwrap().is_empty());

    let titles = |account: &chargeline_core::Account| {
        account
            .relations
            .notices
            .get()
            .unwrap()
            .iter()
            .map(|notice| notice.title.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(titles(a), vec!["a"]);
    assert_eq!(titles(b), vec!["b", "c"]);
    assert!(titles(c).is_empty());

    assert_eq!(a.relations.cancellation.get(), Some(&None));
    assert_eq!(
        c.relations
            .cancellation
            .get()
            .unwrap()
            .as_ref()
            .unwrap()
            .reason
            .as_deref(),
        Some("moved")
    );
    assert!(a.relations.device_token.get().unwrap().is_none());
}
