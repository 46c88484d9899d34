use std::sync::Arc;

use chrono::NaiveDate;

use moor_registry::logic::guard;
use moor_registry::model::{
    EntityKind, HistoryCategory, JournalKind, LookupKind, NewCluster, NewHistoryEntry,
    NewJournalEntry, NewLandParcel, NewLocation, NewLookupValue, NewPerson,
};
use moor_registry::store::traits::*;
use moor_registry::store::MemoryStore;
use moor_registry::{CollectionName, RegistryError};

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn cluster(name: &str) -> NewCluster {
    NewCluster {
        name: name.to_string(),
        description: None,
    }
}

fn location(name: &str, cluster_id: Option<String>) -> NewLocation {
    NewLocation {
        name: name.to_string(),
        description: None,
        coordinates: Some("POINT(10.5 53.5)".to_string()),
        cluster_id,
    }
}

fn person(first: &str, last: &str) -> NewPerson {
    NewPerson {
        salutation: None,
        first_name: first.to_string(),
        last_name: last.to_string(),
        address: None,
        city: None,
        postal_code: None,
        country: None,
        phone: None,
        email: None,
        iban: None,
        profession: None,
        institution_id: None,
    }
}

async fn store_with_usage_type(store: &MemoryStore) -> String {
    store
        .create_lookup(
            LookupKind::UsageTypes,
            NewLookupValue {
                name: "Naturschutz".to_string(),
                description: None,
            },
        )
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn delete_without_dependents_removes_the_record() {
    let store = MemoryStore::new();
    let c = store.create_cluster(cluster("Nordmoor")).await.unwrap();

    guard::checked_delete(&store, EntityKind::Cluster, &c.id)
        .await
        .unwrap();

    let err = store.get_cluster(&c.id).await.unwrap_err();
    assert!(matches!(err, RegistryError::NotFound { .. }));
}

#[tokio::test]
async fn delete_with_history_is_blocked_and_names_the_collection() {
    let store = MemoryStore::new();
    let loc = store.create_location(location("Standort", None)).await.unwrap();
    let usage = store_with_usage_type(&store).await;
    store
        .append_history(
            HistoryCategory::Usage,
            &loc.id,
            NewHistoryEntry {
                classification_id: usage,
                start_date: date(2020, 1, 1),
                end_date: None,
            },
        )
        .await
        .unwrap();

    let err = guard::checked_delete(&store, EntityKind::Location, &loc.id)
        .await
        .unwrap_err();
    match err {
        RegistryError::HasDependents { collections, .. } => {
            assert!(collections.contains(&CollectionName::UsageHistory));
        }
        other => panic!("expected HasDependents, got {:?}", other),
    }

    // nothing was removed
    assert_eq!(store.get_location(&loc.id).await.unwrap().id, loc.id);
}

#[tokio::test]
async fn delete_unblocks_after_dependents_are_cleared() {
    let store = MemoryStore::new();
    let loc = store.create_location(location("Standort", None)).await.unwrap();
    let usage = store_with_usage_type(&store).await;
    let entry = store
        .append_history(
            HistoryCategory::Usage,
            &loc.id,
            NewHistoryEntry {
                classification_id: usage.clone(),
                start_date: date(2020, 1, 1),
                end_date: None,
            },
        )
        .await
        .unwrap();

    // the lookup value is referenced too, so deleting it is blocked
    let err = guard::checked_delete(&store, EntityKind::UsageType, &usage)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::HasDependents { .. }));

    guard::checked_delete(&store, EntityKind::HistoryEntry, &entry.id)
        .await
        .unwrap();
    guard::checked_delete(&store, EntityKind::Location, &loc.id)
        .await
        .unwrap();
    guard::checked_delete(&store, EntityKind::UsageType, &usage)
        .await
        .unwrap();
}

#[tokio::test]
async fn dangling_owner_leaves_no_partial_record() {
    let store = MemoryStore::new();
    let err = store
        .create_parcel(NewLandParcel {
            parcel_number: "123/45".to_string(),
            area_size: None,
            owner_id: Some("no-such-person".to_string()),
            address: None,
            city: None,
            postal_code: None,
            country: None,
            coordinates: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::DanglingReference { .. }));
    assert!(store.list_parcels().await.unwrap().is_empty());
}

#[tokio::test]
async fn ledger_accepts_closed_then_open_and_rejects_overlap() {
    let store = MemoryStore::new();
    let loc = store.create_location(location("Standort", None)).await.unwrap();
    let usage = store_with_usage_type(&store).await;

    store
        .append_history(
            HistoryCategory::Usage,
            &loc.id,
            NewHistoryEntry {
                classification_id: usage.clone(),
                start_date: date(2020, 1, 1),
                end_date: Some(date(2020, 12, 31)),
            },
        )
        .await
        .unwrap();
    let open = store
        .append_history(
            HistoryCategory::Usage,
            &loc.id,
            NewHistoryEntry {
                classification_id: usage.clone(),
                start_date: date(2021, 1, 1),
                end_date: None,
            },
        )
        .await
        .unwrap();

    // starts inside the closed 2020 range
    let err = store
        .append_history(
            HistoryCategory::Usage,
            &loc.id,
            NewHistoryEntry {
                classification_id: usage.clone(),
                start_date: date(2020, 6, 1),
                end_date: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::OverlapViolation { .. }));

    let current = store
        .current_entry(HistoryCategory::Usage, &loc.id)
        .await
        .unwrap()
        .expect("open entry is current");
    assert_eq!(current.id, open.id);
}

#[tokio::test]
async fn closing_an_entry_makes_room_and_clears_current() {
    let store = MemoryStore::new();
    let loc = store.create_location(location("Standort", None)).await.unwrap();
    let usage = store_with_usage_type(&store).await;

    let open = store
        .append_history(
            HistoryCategory::Usage,
            &loc.id,
            NewHistoryEntry {
                classification_id: usage.clone(),
                start_date: date(2020, 1, 1),
                end_date: None,
            },
        )
        .await
        .unwrap();

    store
        .close_history_entry(&open.id, date(2022, 12, 31))
        .await
        .unwrap();

    // a fully closed history has no current classification
    assert!(store
        .current_entry(HistoryCategory::Usage, &loc.id)
        .await
        .unwrap()
        .is_none());

    // closing twice is rejected
    let err = store
        .close_history_entry(&open.id, date(2023, 1, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Validation(_)));

    // the freed range can be followed
    store
        .append_history(
            HistoryCategory::Usage,
            &loc.id,
            NewHistoryEntry {
                classification_id: usage,
                start_date: date(2023, 1, 1),
                end_date: None,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_overlapping_appends_let_exactly_one_win() {
    let store = Arc::new(MemoryStore::new());
    let loc = store.create_location(location("Standort", None)).await.unwrap();
    let usage = store_with_usage_type(&store).await;

    let mut tasks = Vec::new();
    for month in 1..=6u32 {
        let store = Arc::clone(&store);
        let loc_id = loc.id.clone();
        let usage = usage.clone();
        tasks.push(tokio::spawn(async move {
            store
                .append_history(
                    HistoryCategory::Usage,
                    &loc_id,
                    NewHistoryEntry {
                        classification_id: usage,
                        start_date: date(2020, month, 1),
                        end_date: None,
                    },
                )
                .await
        }));
    }

    let mut wins = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(
        store.history(HistoryCategory::Usage, &loc.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn delete_racing_an_append_never_orphans_history() {
    // Whichever lands first must make the other fail: a delete after the
    // append sees HasDependents, an append after the delete sees NotFound.
    // Both succeeding would leave history for a location that is gone.
    for _ in 0..200 {
        let store = Arc::new(MemoryStore::new());
        let loc = store.create_location(location("Standort", None)).await.unwrap();
        let usage = store_with_usage_type(&store).await;

        let append = {
            let store = Arc::clone(&store);
            let loc_id = loc.id.clone();
            tokio::spawn(async move {
                store
                    .append_history(
                        HistoryCategory::Usage,
                        &loc_id,
                        NewHistoryEntry {
                            classification_id: usage,
                            start_date: date(2020, 1, 1),
                            end_date: None,
                        },
                    )
                    .await
            })
        };
        let delete = {
            let store = Arc::clone(&store);
            let loc_id = loc.id.clone();
            tokio::spawn(async move {
                guard::checked_delete(&*store, EntityKind::Location, &loc_id).await
            })
        };

        let appended = append.await.unwrap().is_ok();
        let deleted = delete.await.unwrap().is_ok();
        assert!(
            !(appended && deleted),
            "location deleted while a usage entry landed"
        );
        if deleted {
            assert!(store.get_location(&loc.id).await.is_err());
            assert_eq!(
                store
                    .count_referencing(CollectionName::UsageHistory, &loc.id)
                    .await
                    .unwrap(),
                0
            );
        }
    }
}

#[tokio::test]
async fn advisory_check_names_blockers_and_clears() {
    let store = MemoryStore::new();
    let loc = store.create_location(location("Standort", None)).await.unwrap();
    let usage = store_with_usage_type(&store).await;
    let entry = store
        .append_history(
            HistoryCategory::Usage,
            &loc.id,
            NewHistoryEntry {
                classification_id: usage,
                start_date: date(2020, 1, 1),
                end_date: None,
            },
        )
        .await
        .unwrap();

    let check = guard::can_delete(&store, EntityKind::Location, &loc.id)
        .await
        .unwrap();
    assert!(!check.allowed);
    assert!(check
        .blocking_collections
        .contains(&CollectionName::UsageHistory));

    guard::checked_delete(&store, EntityKind::HistoryEntry, &entry.id)
        .await
        .unwrap();
    let check = guard::can_delete(&store, EntityKind::Location, &loc.id)
        .await
        .unwrap();
    assert!(check.allowed);
    assert!(check.blocking_collections.is_empty());
}

#[tokio::test]
async fn journals_are_append_only() {
    let store = MemoryStore::new();
    let p = store.create_person(person("Hans", "Mueller")).await.unwrap();
    let entry = store
        .append_journal(
            JournalKind::Person,
            &p.id,
            NewJournalEntry {
                related_id: None,
                action_date: date(2024, 5, 1),
                action_type: Some("Begehung".to_string()),
                description: None,
            },
        )
        .await
        .unwrap();

    let err = guard::checked_delete(&store, EntityKind::JournalEntry, &entry.id)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Validation(_)));

    // the entry also blocks deleting its subject
    let err = guard::checked_delete(&store, EntityKind::Person, &p.id)
        .await
        .unwrap_err();
    match err {
        RegistryError::HasDependents { collections, .. } => {
            assert!(collections.contains(&CollectionName::PersonJournal));
        }
        other => panic!("expected HasDependents, got {:?}", other),
    }
}

#[tokio::test]
async fn cluster_filter_scopes_location_listing() {
    let store = MemoryStore::new();
    let north = store.create_cluster(cluster("Nordmoor")).await.unwrap();
    let south = store.create_cluster(cluster("Suedmoor")).await.unwrap();
    store
        .create_location(location("Nord 1", Some(north.id.clone())))
        .await
        .unwrap();
    store
        .create_location(location("Nord 2", Some(north.id.clone())))
        .await
        .unwrap();
    store
        .create_location(location("Sued 1", Some(south.id.clone())))
        .await
        .unwrap();

    assert_eq!(store.list_locations(Some(&north.id)).await.unwrap().len(), 2);
    assert_eq!(store.list_locations(Some(&south.id)).await.unwrap().len(), 1);
    assert_eq!(store.list_locations(None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn geometry_kind_is_enforced_per_entity() {
    let store = MemoryStore::new();
    let err = store
        .create_location(NewLocation {
            name: "Standort".to_string(),
            description: None,
            coordinates: Some("POLYGON((0 0, 0 1, 1 1, 1 0, 0 0))".to_string()),
            cluster_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Validation(_)));

    let err = store
        .create_parcel(NewLandParcel {
            parcel_number: "1/1".to_string(),
            area_size: None,
            owner_id: None,
            address: None,
            city: None,
            postal_code: None,
            country: None,
            coordinates: Some("POINT(1 2)".to_string()),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Validation(_)));
}
