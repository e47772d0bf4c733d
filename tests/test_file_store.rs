//! File store behaviour for servers registered through the fleet.

mod common;

use std::fs;
use std::io::Read;

use common::{definition, Workspace};
use corral_daemon::DaemonRuntime;
use corral_types::CorralError;

/// Runtime with server `alpha` rooted at `srv/alpha` plus extra root `data/beta`.
async fn alpha_with_beta(ws: &Workspace) -> DaemonRuntime {
    let alpha = ws.dir("srv/alpha");
    let beta = ws.dir("data/beta");
    let daemon = DaemonRuntime::start(ws.config()).unwrap();
    let mut def = definition("sleep 30", &alpha);
    def.extra_directories.push(beta.to_string_lossy().into_owned());
    daemon.fleet().create("alpha", def).await.unwrap();
    daemon
}

#[tokio::test]
async fn roots_are_listed_and_selected_by_name() {
    let ws = Workspace::new();
    let daemon = alpha_with_beta(&ws).await;
    let files = daemon.fleet().files();

    let roots: Vec<_> = files
        .list_roots("alpha")
        .unwrap()
        .into_iter()
        .map(|info| info.name)
        .collect();
    assert_eq!(roots, vec!["alpha", "beta"]);

    files.create_file("alpha", "beta", "level.dat").unwrap();
    assert!(ws.path().join("data/beta/level.dat").exists());
    assert!(matches!(
        files.create_file("alpha", "gamma", "x"),
        Err(CorralError::PathOutsideServer { .. })
    ));
}

#[tokio::test]
async fn traversal_is_rejected_everywhere() {
    let ws = Workspace::new();
    let daemon = alpha_with_beta(&ws).await;
    let files = daemon.fleet().files();
    fs::write(ws.path().join("secret.txt"), "secret").unwrap();

    assert!(matches!(
        files.open_file("alpha", "alpha/../../../secret.txt"),
        Err(CorralError::InvalidPath(_))
    ));
    assert!(matches!(
        files.list("alpha", "alpha/logs/../"),
        Err(CorralError::InvalidPath(_))
    ));
    assert!(files.create_file("alpha", "alpha", "sub/evil.txt").is_err());
    assert!(files.create_directory("alpha", "alpha", "..").is_err());
    assert!(files.rename("alpha", "beta", "escaped").is_err());
    assert!(matches!(
        files.delete("alpha", "beta"),
        Err(CorralError::MethodNotAllowed(_))
    ));
    assert!(ws.path().join("secret.txt").exists());
}

#[tokio::test]
async fn archive_round_trip_reproduces_tree() {
    let ws = Workspace::new();
    let daemon = alpha_with_beta(&ws).await;
    let files = daemon.fleet().files();

    files.create_directory("alpha", "alpha", "data").unwrap();
    files.create_directory("alpha", "alpha/data", "y").unwrap();
    files.edit_file("alpha", "alpha/data/x.txt", b"x content").unwrap();
    files.edit_file("alpha", "alpha/data/y/z.txt", b"z content").unwrap();

    files
        .compress("alpha", "alpha/data.zip", &["alpha/data".to_string()])
        .unwrap();
    files.delete("alpha", "alpha/data").unwrap();
    files.decompress("alpha", "alpha/data.zip").unwrap();

    let mut x = String::new();
    files
        .open_file("alpha", "alpha/data/x.txt")
        .unwrap()
        .file
        .read_to_string(&mut x)
        .unwrap();
    assert_eq!(x, "x content");
    assert_eq!(
        fs::read(ws.path().join("srv/alpha/data/y/z.txt")).unwrap(),
        b"z content"
    );
    assert!(ws.path().join("srv/alpha/data/y").is_dir());
}

#[tokio::test]
async fn bulk_move_between_roots() {
    let ws = Workspace::new();
    let daemon = alpha_with_beta(&ws).await;
    let files = daemon.fleet().files();
    for name in ["a.log", "b.log"] {
        files.create_file("alpha", "alpha", name).unwrap();
    }
    files.create_file("alpha", "beta", "b.log").unwrap();

    let conflicts = files
        .conflicting_files("alpha", "beta", &["a.log".into(), "b.log".into()])
        .unwrap();
    assert_eq!(conflicts, vec!["b.log"]);

    let failures = files.move_many(
        "alpha",
        &["alpha/a.log".into(), "alpha/b.log".into()],
        "beta",
    );
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "alpha/b.log");
    assert!(ws.path().join("data/beta/a.log").exists());
    assert!(ws.path().join("srv/alpha/b.log").exists());
}

#[tokio::test]
async fn removed_server_loses_its_roots() {
    let ws = Workspace::new();
    let daemon = alpha_with_beta(&ws).await;
    daemon.fleet().remove("alpha").await.unwrap();
    assert!(matches!(
        daemon.fleet().files().list("alpha", "alpha"),
        Err(CorralError::ServerNotFound(_))
    ));
    // files themselves are untouched
    assert!(ws.path().join("srv/alpha").is_dir());
}
