use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use samwise_core::backend::local::{load_undo_cache, save_undo_cache};
use samwise_core::backend::{Backend, LocalBackend};
use samwise_core::model::{Id, SubTask, Tag, Task, TaskWithSubTasks};
use samwise_core::state::UndoCache;
use tempfile::tempdir;

fn task(name: &str) -> Task {
    Task {
        id: Id::temp(),
        name: name.to_string(),
        tag: Id::none_tag(),
        date: Utc
            .with_ymd_and_hms(2026, 10, 20, 12, 0, 0)
            .single()
            .expect("valid date"),
        complete: false,
        in_focus: false,
    }
}

fn write_rc(dir: &Path) -> PathBuf {
    let rc = dir.join("samwiserc");
    fs::write(&rc, "color=off\nbacklog.mode=monthly\n").expect("write rc");
    rc
}

fn run_cli(rc: &Path, data: &Path, args: &[&str]) -> anyhow::Result<()> {
    let mut raw: Vec<OsString> = vec![
        "samwise".into(),
        "--samwiserc".into(),
        rc.as_os_str().to_os_string(),
        "--data".into(),
        data.as_os_str().to_os_string(),
    ];
    raw.extend(args.iter().map(OsString::from));
    samwise_core::run(raw)
}

#[tokio::test]
async fn local_backend_assigns_sequential_ids_and_persists_records() {
    let temp = tempdir().expect("tempdir");
    let backend = LocalBackend::open(temp.path()).expect("open");

    let tag = backend
        .create_tag(Tag {
            id: Id::temp(),
            name: "CS 3110".to_string(),
            color: "#00aa00".to_string(),
            class_id: None,
        })
        .await
        .expect("create tag");
    assert_eq!(tag.id, Id::from("1"));

    let mut essay = task("essay");
    essay.tag = tag.id.clone();
    let created = backend.create_task(essay).await.expect("create task");
    assert_eq!(created.id, Id::from("2"));

    let subtask = backend
        .create_subtask(
            created.clone(),
            SubTask {
                id: Id::temp(),
                parent: created.id.clone(),
                order: 0,
                name: "outline".to_string(),
                complete: false,
                in_focus: false,
            },
        )
        .await
        .expect("create subtask");
    assert_eq!(subtask.id, Id::from("3"));
    assert_eq!(subtask.parent, created.id);

    let mut done = created.clone();
    done.complete = true;
    backend.edit_task(done).await.expect("edit");

    let reopened = LocalBackend::open(temp.path()).expect("reopen");
    let loaded = reopened.load_all().await.expect("load");
    loaded.validate().expect("consistent");
    assert_eq!(loaded.tags.len(), 1);
    assert_eq!(loaded.tasks.len(), 1);
    assert!(loaded.tasks[0].complete);
    assert_eq!(loaded.tasks[0].tag, tag.id);
    assert_eq!(loaded.subtasks.len(), 1);

    reopened
        .delete_task(created.id.clone(), vec![subtask.id.clone()])
        .await
        .expect("delete");
    let loaded = reopened.load_all().await.expect("load");
    assert!(loaded.tasks.is_empty());
    assert!(loaded.subtasks.is_empty());
}

#[tokio::test]
async fn local_backend_never_reissues_a_deleted_id() {
    let temp = tempdir().expect("tempdir");
    let backend = LocalBackend::open(temp.path()).expect("open");

    let first = backend.create_task(task("first")).await.expect("create");
    assert_eq!(first.id, Id::from("1"));
    backend
        .delete_task(first.id.clone(), vec![])
        .await
        .expect("delete");

    let second = backend.create_task(task("second")).await.expect("create");
    assert_eq!(second.id, Id::from("2"));

    let reopened = LocalBackend::open(temp.path()).expect("reopen");
    reopened
        .delete_task(second.id.clone(), vec![])
        .await
        .expect("delete");
    let third = reopened.create_task(task("third")).await.expect("create");
    assert_eq!(third.id, Id::from("3"));
}

#[tokio::test]
async fn deleting_a_tag_moves_stored_tasks_to_none() {
    let temp = tempdir().expect("tempdir");
    let backend = LocalBackend::open(temp.path()).expect("open");
    let tag = backend
        .create_tag(Tag {
            id: Id::temp(),
            name: "Gym".to_string(),
            color: "#ff8800".to_string(),
            class_id: None,
        })
        .await
        .expect("create tag");
    let mut workout = task("workout");
    workout.tag = tag.id.clone();
    backend.create_task(workout).await.expect("create task");

    backend.delete_tag(tag.id).await.expect("delete tag");

    let loaded = backend.load_all().await.expect("load");
    assert!(loaded.tags.is_empty());
    assert_eq!(loaded.tasks[0].tag, Id::none_tag());
}

#[test]
fn undo_cache_survives_a_save_and_load() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("undo.data");

    assert_eq!(
        load_undo_cache(&path).expect("missing file is empty"),
        UndoCache::default()
    );

    let cache = UndoCache {
        last_deleted: Some(TaskWithSubTasks {
            task: task("essay"),
            subtasks: vec![],
        }),
    };
    save_undo_cache(&path, &cache).expect("save");
    assert_eq!(load_undo_cache(&path).expect("load"), cache);
}

#[test]
fn cli_add_complete_remove_and_undo_against_local_files() {
    let temp = tempdir().expect("tempdir");
    let rc = write_rc(temp.path());
    let data = temp.path().join("data");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let load = || {
        runtime
            .block_on(LocalBackend::open(&data).expect("open").load_all())
            .expect("load")
    };

    run_cli(&rc, &data, &["add", "write", "essay", "--date", "+3d", "--sub", "outline"])
        .expect("add");
    let loaded = load();
    assert_eq!(loaded.tasks.len(), 1);
    assert_eq!(loaded.tasks[0].name, "write essay");
    assert_eq!(loaded.subtasks.len(), 1);
    let id = loaded.tasks[0].id.to_string();

    run_cli(&rc, &data, &["done", &id]).expect("done");
    let loaded = load();
    assert!(loaded.tasks[0].complete);
    assert!(loaded.subtasks[0].complete);

    run_cli(&rc, &data, &["rm", &id]).expect("rm");
    assert!(load().tasks.is_empty());
    assert!(data.join("undo.data").exists());

    run_cli(&rc, &data, &["undo"]).expect("undo");
    let loaded = load();
    assert_eq!(loaded.tasks.len(), 1);
    assert_eq!(loaded.subtasks.len(), 1);
    assert_eq!(loaded.subtasks[0].parent, loaded.tasks[0].id);

    run_cli(&rc, &data, &["backlog"]).expect("backlog");
    run_cli(&rc, &data, &["count", "--completed"]).expect("count");
}

#[test]
fn cli_rejects_unknown_tasks_and_the_none_tag() {
    let temp = tempdir().expect("tempdir");
    let rc = write_rc(temp.path());
    let data = temp.path().join("data");

    let err = run_cli(&rc, &data, &["done", "42"]).expect_err("unknown task");
    assert!(format!("{err:#}").contains("unknown task"));

    let err = run_cli(&rc, &data, &["tag-rm", "None"]).expect_err("protected");
    assert!(format!("{err:#}").contains("None tag"));
}
