mod common;

use common::{memory_store, Application, ApplicationRepository};
use depot_core::{LockMode, Repository, StoreError};

#[test]
fn save_assigns_an_identifier_and_find_by_id_returns_it() {
    let store = memory_store();
    store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            let saved = repo.save(Application::new("Application", "REF-1"))?;
            let id = saved.id.expect("save must assign an identifier");

            let found = repo.find_by_id(Some(&id))?.expect("row must exist");
            assert_eq!(found, saved);
            assert_eq!(found.name, "Application");
            Ok(())
        })
        .unwrap();
}

#[test]
fn saving_twice_does_not_duplicate() {
    let store = memory_store();
    store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            let saved = repo.save(Application::new("Application", "REF-1"))?;
            let merged = repo.save(saved)?;

            assert!(merged.id.is_some());
            assert_eq!(repo.find_all()?.len(), 1);
            Ok(())
        })
        .unwrap();
}

#[test]
fn saving_a_detached_entity_reattaches_without_duplicate() {
    let store = memory_store();
    let detached = store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            repo.save(Application::new("Application", "REF-1"))
        })
        .unwrap();

    store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            let mut changed = detached.clone();
            changed.name = "Renamed".to_string();
            let merged = repo.save(changed)?;

            assert_eq!(merged.id, detached.id);
            assert_eq!(merged.name, "Renamed");
            assert_eq!(repo.find_all()?.len(), 1);
            Ok(())
        })
        .unwrap();
}

#[test]
fn save_merge_returns_the_managed_copy() {
    let store = memory_store();
    store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            let saved = repo.save(Application::new("Application", "REF-1"))?;

            let mut replacement = Application::new("Other", "REF-2");
            replacement.id = saved.id;
            let merged = repo.save(replacement)?;

            assert_eq!(merged.id, saved.id);
            assert_eq!(merged.name, "Other");
            assert_eq!(merged.reference, "REF-2");
            assert_eq!(repo.find_all()?.len(), 1);
            Ok(())
        })
        .unwrap();
}

#[test]
fn save_with_an_unknown_identifier_is_not_found() {
    let store = memory_store();
    store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            let mut ghost = Application::new("Ghost", "REF-404");
            ghost.id = Some(404);

            let err = repo.save(ghost).unwrap_err();
            assert!(matches!(
                err,
                StoreError::NotFound {
                    entity: "applications",
                    ..
                }
            ));
            Ok(())
        })
        .unwrap();
}

#[test]
fn find_by_id_with_an_absent_identifier_short_circuits() {
    let store = memory_store();
    store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            assert!(repo.find_by_id(None)?.is_none());
            assert!(repo
                .find_by_id_with(None, LockMode::PessimisticWrite)?
                .is_none());
            Ok(())
        })
        .unwrap();
}

#[test]
fn get_by_id_raises_not_found_where_find_by_id_is_absent() {
    let store = memory_store();
    store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            assert!(repo.find_by_id(Some(&4242))?.is_none());

            let err = repo.get_by_id(&4242).unwrap_err();
            assert!(matches!(
                err,
                StoreError::NotFound {
                    entity: "applications",
                    ..
                }
            ));
            Ok(())
        })
        .unwrap();
}

#[test]
fn delete_by_id_of_a_missing_row_is_a_silent_noop() {
    let store = memory_store();
    store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            repo.save(Application::new("Application", "REF-1"))?;

            repo.delete_by_id(&4242)?;
            assert_eq!(repo.find_all()?.len(), 1);
            Ok(())
        })
        .unwrap();
}

#[test]
fn delete_excludes_the_entity_from_later_reads() {
    let store = memory_store();
    let saved = store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            repo.save(Application::new("Application", "REF-1"))
        })
        .unwrap();
    let id = saved.id.unwrap();

    store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            let managed = repo.get_by_id(&id)?;
            repo.delete(&managed)?;

            // Observed inside the same unit of work already.
            assert!(repo.find_all()?.is_empty());
            assert!(repo.find_by_id(Some(&id))?.is_none());
            Ok(())
        })
        .unwrap();

    store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            assert!(repo.find_all()?.is_empty());
            Ok(())
        })
        .unwrap();
}

#[test]
fn read_your_writes_within_one_unit_of_work() {
    let store = memory_store();
    store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            let saved = repo.save(Application::new("Application", "REF-1"))?;
            let id = saved.id.unwrap();

            let mut changed = saved;
            changed.name = "Renamed".to_string();
            repo.save(changed)?;

            let found = repo.find_by_id(Some(&id))?.unwrap();
            assert_eq!(found.name, "Renamed");
            assert!(repo.find_by_reference("REF-1")?.is_some());
            Ok(())
        })
        .unwrap();
}

#[test]
fn find_all_orders_by_identifier() {
    let store = memory_store();
    store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            repo.save(Application::new("First", "REF-1"))?;
            repo.save(Application::new("Second", "REF-2"))?;
            repo.save(Application::new("Third", "REF-3"))?;

            let all = repo.find_all()?;
            assert_eq!(all.len(), 3);
            let ids: Vec<i64> = all.iter().map(|app| app.id.unwrap()).collect();
            let mut sorted = ids.clone();
            sorted.sort_unstable();
            assert_eq!(ids, sorted);
            Ok(())
        })
        .unwrap();
}

// One application from creation to deletion, one unit of work per step.
#[test]
fn application_lifecycle_end_to_end() {
    let store = memory_store();

    // Create: persist, then merge the managed copy.
    let identifier = store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            let saved = repo.save(Application::new("Application", "REF-1"))?;
            let saved = repo.save(saved)?;
            Ok(saved.id.expect("identifier must be assigned"))
        })
        .unwrap();

    store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            assert_eq!(repo.find_all()?.len(), 1);
            Ok(())
        })
        .unwrap();

    store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            let retrieved = repo.get_by_id(&identifier)?;
            assert_eq!(retrieved.id, Some(identifier));
            Ok(())
        })
        .unwrap();

    store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            let found = repo.find_by_reference("REF-1")?;
            assert!(found.is_some());
            assert!(repo.find_by_reference("REF-2")?.is_none());
            Ok(())
        })
        .unwrap();

    // Delete through a lazy reference, never loading the row up front.
    store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            let reference = repo
                .reference(Some(&identifier))
                .expect("identifier is present");
            repo.delete(reference.get()?)?;

            assert!(repo.find_all()?.is_empty());
            assert_eq!(repo.entity_type(), "applications");
            Ok(())
        })
        .unwrap();

    store
        .transaction(|session| {
            let repo = ApplicationRepository::try_new(session)?;
            assert!(repo.find_all()?.is_empty());
            Ok(())
        })
        .unwrap();
}
