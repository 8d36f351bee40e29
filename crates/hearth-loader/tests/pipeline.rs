//! End-to-end pipeline tests: persisted rows in, callback dispatches out.

use std::sync::Arc;
use std::time::Duration;

use hearth_events::{topics, Bus};
use hearth_loader::test_support::{FakeInventory, RecordingCallbacks};
use hearth_loader::{PackageRemovedTask, ShellModel, ShortcutIntent};
use hearth_model::{GridSpec, ItemKind, ProfileHandle, CONTAINER_DESKTOP};
use hearth_store::{LayoutRow, LayoutStore};

fn app_row(id: i64, x: i32, y: i32, intent: &str) -> LayoutRow {
    let mut row = LayoutRow::new(ItemKind::Application.tag(), CONTAINER_DESKTOP, 0);
    row.id = id;
    row.cell_x = x;
    row.cell_y = y;
    row.intent = Some(intent.into());
    row
}

fn shortcut_row(id: i64, x: i32, package: &str, shortcut_id: &str) -> LayoutRow {
    let mut row = LayoutRow::new(ItemKind::DeepShortcut.tag(), CONTAINER_DESKTOP, 0);
    row.id = id;
    row.cell_x = x;
    row.cell_y = 3;
    row.intent = Some(
        ShortcutIntent {
            package: package.to_string(),
            id: shortcut_id.to_string(),
            url: None,
        }
        .encode(),
    );
    row
}

async fn wait_until(mut pred: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !pred() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn seed_store(dir: &std::path::Path, rows: Vec<LayoutRow>) {
    let store = LayoutStore::open(dir).unwrap();
    for mut row in rows {
        store.insert(&mut row).unwrap();
    }
}

#[tokio::test]
async fn full_load_publishes_snapshot_and_repairs_store() {
    let dir = tempfile::tempdir().unwrap();
    seed_store(
        dir.path(),
        vec![
            app_row(1, 0, 0, "com.a/Main"),
            // Same cell as row 1: the later row loses and is deleted.
            app_row(2, 0, 0, "com.b/Main"),
            app_row(3, 1, 0, "com.c/Main"),
        ],
    );

    let inventory = Arc::new(FakeInventory::with_default_profile());
    inventory.add_activity("com.a", "Main", "Alpha");
    inventory.add_activity("com.b", "Main", "Beta");
    inventory.add_activity("com.c", "Main", "Gamma");

    let shell =
        ShellModel::new(dir.path(), GridSpec::default(), inventory, Bus::default()).unwrap();
    let callbacks = RecordingCallbacks::new();
    shell.register_callbacks(callbacks.clone());

    let load = shell.start_load().await;
    load.wait_finished().await;
    wait_until(|| callbacks.is_complete()).await;

    assert_eq!(callbacks.item_ids(), vec![1, 3]);
    let order = callbacks.order.lock().unwrap().clone();
    let pos = |what| order.iter().position(|o| *o == what).unwrap();
    assert!(pos("screens") < pos("items"));
    assert!(pos("items") < pos("all-apps"));
    assert!(pos("all-apps") < pos("complete"));

    // The losing row was deleted from the store, so a second load sees a
    // clean layout.
    let store = LayoutStore::open(dir.path()).unwrap();
    let ids: Vec<i64> = store.query_all().unwrap().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 3]);

    // All three activities made it into the all-apps list.
    assert_eq!(callbacks.apps.lock().unwrap().len(), 3);
    shell.shutdown().await;
}

#[tokio::test]
async fn reload_is_idempotent_over_a_repaired_store() {
    let dir = tempfile::tempdir().unwrap();
    seed_store(
        dir.path(),
        vec![
            app_row(1, 0, 0, "com.a/Main"),
            // Container 77 never gets a defining row; the child survives
            // unparented and the placeholder is purged.
            {
                let mut row = app_row(2, 1, 0, "com.a/Main");
                row.container = 77;
                row
            },
        ],
    );

    let inventory = Arc::new(FakeInventory::with_default_profile());
    inventory.add_activity("com.a", "Main", "Alpha");

    let shell =
        ShellModel::new(dir.path(), GridSpec::default(), inventory, Bus::default()).unwrap();
    let callbacks = RecordingCallbacks::new();
    shell.register_callbacks(callbacks.clone());

    shell.start_load().await.wait_finished().await;
    wait_until(|| callbacks.is_complete()).await;
    let first = callbacks.item_ids();
    assert_eq!(first, vec![1, 2]);
    assert!(!first.contains(&77));

    let second_run = RecordingCallbacks::new();
    shell.register_callbacks(second_run.clone());
    shell.start_load().await.wait_finished().await;
    wait_until(|| second_run.is_complete()).await;
    assert_eq!(second_run.item_ids(), first);
    shell.shutdown().await;
}

#[tokio::test]
async fn newer_load_supersedes_and_cancels_the_older_one() {
    let dir = tempfile::tempdir().unwrap();
    let rows: Vec<LayoutRow> = (0i32..20)
        .map(|n| app_row(i64::from(n + 1), n % 5, n / 5, "com.a/Main"))
        .collect();
    seed_store(dir.path(), rows);

    let inventory = Arc::new(FakeInventory::with_default_profile());
    inventory.add_activity("com.a", "Main", "Alpha");

    let shell =
        ShellModel::new(dir.path(), GridSpec::default(), inventory, Bus::default()).unwrap();
    let first = shell.start_load().await;
    let second = shell.start_load().await;
    assert!(first.is_cancelled());

    second.wait_finished().await;
    first.wait_finished().await;
    assert!(shell.model().item_count() > 0);
    shell.shutdown().await;
}

#[tokio::test]
async fn package_removed_task_clears_model_list_and_store() {
    let dir = tempfile::tempdir().unwrap();
    seed_store(
        dir.path(),
        vec![
            app_row(1, 0, 0, "com.keep/Main"),
            shortcut_row(2, 0, "com.p", "s1"),
            shortcut_row(3, 1, "com.p", "s2"),
        ],
    );

    let inventory = Arc::new(FakeInventory::with_default_profile());
    inventory.add_activity("com.keep", "Main", "Keeper");
    inventory.add_activity("com.p", "Main", "P");

    let bus = Bus::default();
    let shell =
        ShellModel::new(dir.path(), GridSpec::default(), inventory.clone(), bus.clone()).unwrap();
    let callbacks = RecordingCallbacks::new();
    shell.register_callbacks(callbacks.clone());

    shell.start_load().await.wait_finished().await;
    wait_until(|| callbacks.is_complete()).await;
    assert_eq!(callbacks.item_ids(), vec![1, 2, 3]);

    // The package disappears from the device, then the removal task runs.
    inventory.remove_package("com.p");
    let mut rx = bus.subscribe();
    shell
        .enqueue_task(Box::new(PackageRemovedTask {
            packages: vec!["com.p".into()],
            profile: ProfileHandle(0),
        }))
        .await;
    loop {
        let env = rx.recv().await.unwrap();
        if env.kind == topics::TOPIC_TASK_COMPLETED {
            break;
        }
    }

    assert_eq!(shell.model().item_count(), 1);
    assert!(shell.model().get_item(1).is_some());
    assert!(shell
        .apps()
        .snapshot()
        .0
        .iter()
        .all(|e| e.component.package != "com.p"));
    assert_eq!(
        callbacks.removed_packages.lock().unwrap().as_slice(),
        ["com.p".to_string()]
    );

    // The batched delete reached the store.
    let store = LayoutStore::open(dir.path()).unwrap();
    let ids: Vec<i64> = store.query_all().unwrap().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1]);
    shell.shutdown().await;
}
