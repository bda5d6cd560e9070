use tempfile::TempDir;

use framekeeper::{App, CameraConfig, FramekeeperConfig, SessionError};

fn test_app(dir: &TempDir) -> App {
    let config = FramekeeperConfig {
        db_path: dir
            .path()
            .join("framekeeper.db")
            .to_string_lossy()
            .into_owned(),
        capture_dir: dir.path().join("captured_images"),
        camera: CameraConfig {
            url: "stub://test_camera".to_string(),
            target_fps: 0,
            width: 64,
            height: 48,
        },
    };
    App::open(config).expect("open app")
}

#[test]
fn register_login_capture_delete_end_to_end() {
    let dir = TempDir::new().expect("temp dir");
    let app = test_app(&dir);

    app.sign_up("alice", "pw1").expect("sign up");
    let mut session = app.login("alice", "pw1").expect("login");
    assert_eq!(session.username(), "alice");
    assert!(session.entries().is_empty());

    session.open_camera().expect("open camera");
    assert!(session.camera_open());
    session.read_live_frame().expect("first frame");

    let path = session.capture().expect("capture");
    assert_eq!(session.entries().len(), 1);
    assert!(path.exists());

    // The file decodes as a valid image with the stream's dimensions.
    let decoded = image::open(&path).expect("capture decodes as jpeg");
    assert_eq!(decoded.width(), 64);
    assert_eq!(decoded.height(), 48);

    let name = path.file_name().expect("file name").to_string_lossy();
    assert!(name.starts_with("alice_"), "unexpected name {}", name);
    assert!(name.ends_with(".jpg"), "unexpected name {}", name);

    let id = session.entries()[0].id;
    assert!(session.delete(id).expect("delete"));
    assert!(session.entries().is_empty());
    assert!(!path.exists());
}

#[test]
fn login_fails_with_wrong_password() {
    let dir = TempDir::new().expect("temp dir");
    let app = test_app(&dir);

    app.sign_up("alice", "pw1").expect("sign up");
    assert!(matches!(
        app.login("alice", "pw2"),
        Err(SessionError::InvalidCredentials)
    ));
    assert!(matches!(
        app.sign_up("alice", "other"),
        Err(SessionError::UsernameTaken)
    ));
}

#[test]
fn capture_without_a_frame_changes_nothing() {
    let dir = TempDir::new().expect("temp dir");
    let app = test_app(&dir);

    app.sign_up("alice", "pw1").expect("sign up");
    let mut session = app.login("alice", "pw1").expect("login");
    session.open_camera().expect("open camera");

    // Camera is open but has not produced a frame yet.
    assert!(matches!(
        session.capture(),
        Err(SessionError::CaptureUnavailable)
    ));
    assert!(session.entries().is_empty());

    let captured: Vec<_> = std::fs::read_dir(dir.path().join("captured_images"))
        .expect("read capture dir")
        .collect();
    assert!(captured.is_empty());
}

#[test]
fn delete_survives_an_externally_removed_file() {
    let dir = TempDir::new().expect("temp dir");
    let app = test_app(&dir);

    app.sign_up("alice", "pw1").expect("sign up");
    let mut session = app.login("alice", "pw1").expect("login");
    session.open_camera().expect("open camera");
    session.read_live_frame().expect("first frame");

    let path = session.capture().expect("capture");
    std::fs::remove_file(&path).expect("remove file behind the session's back");

    let id = session.entries()[0].id;
    assert!(session.delete(id).expect("delete without backing file"));
    assert!(session.entries().is_empty());
}

#[test]
fn catalog_survives_relogin() {
    let dir = TempDir::new().expect("temp dir");
    let app = test_app(&dir);

    app.sign_up("alice", "pw1").expect("sign up");
    let mut session = app.login("alice", "pw1").expect("login");
    session.open_camera().expect("open camera");
    session.read_live_frame().expect("first frame");
    let path = session.capture().expect("capture");
    session.logout();

    let session = app.login("alice", "pw1").expect("second login");
    assert_eq!(session.entries().len(), 1);
    assert_eq!(session.entries()[0].file_path, path.to_string_lossy());
}

#[test]
fn users_see_only_their_own_images() {
    let dir = TempDir::new().expect("temp dir");
    let app = test_app(&dir);

    app.sign_up("alice", "pw1").expect("sign up alice");
    app.sign_up("bob", "pw2").expect("sign up bob");

    let mut alice = app.login("alice", "pw1").expect("login alice");
    alice.open_camera().expect("open camera");
    alice.read_live_frame().expect("first frame");
    let alice_path = alice.capture().expect("capture");
    let alice_id = alice.entries()[0].id;

    let mut bob = app.login("bob", "pw2").expect("login bob");
    assert!(bob.entries().is_empty());

    // Bob cannot delete Alice's entry; her file stays on disk.
    assert!(!bob.delete(alice_id).expect("scoped delete"));
    assert!(alice_path.exists());

    alice.refresh().expect("refresh");
    assert_eq!(alice.entries().len(), 1);
}

#[test]
fn closing_the_camera_returns_to_idle() {
    let dir = TempDir::new().expect("temp dir");
    let app = test_app(&dir);

    app.sign_up("alice", "pw1").expect("sign up");
    let mut session = app.login("alice", "pw1").expect("login");

    session.open_camera().expect("open camera");
    session.read_live_frame().expect("first frame");
    session.close_camera();

    assert!(!session.camera_open());
    assert!(session.current_frame().is_none());
    assert!(matches!(
        session.capture(),
        Err(SessionError::CaptureUnavailable)
    ));
}
