//! Build lifecycle tests against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives every façade
//! operation over real HTTP through `TransportClient`. Validates that request
//! building, authentication, status mapping and decoding work end-to-end.

use std::sync::Arc;
use std::time::{Duration, Instant};

use buildserver_core::{
    parse_dependencies, parse_properties, BuildListQuery, BuildServerClient, BuildServerError,
    ErrorKind, NewBuild, TransportClient, TransportConfig,
};
use mock_server::{Build, Db, MockState};

const TOKEN: &str = "s3cr3t";

/// Start a mock server seeded with `state` and return its base URL and a
/// handle to its state.
fn start_server(state: MockState) -> (String, Db) {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    let db = mock_server::shared(state.with_token(TOKEN));
    let server_db = db.clone();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run_with_state(listener, server_db).await
        })
        .unwrap();
    });

    (format!("http://{addr}"), db)
}

fn client(base_url: &str) -> BuildServerClient {
    let config = TransportConfig::new(base_url, TOKEN).with_timeouts(Duration::from_secs(5));
    BuildServerClient::connect(&config).unwrap()
}

/// Inspect server state from the synchronous test thread.
fn with_state<R>(db: &Db, f: impl FnOnce(&mut MockState) -> R) -> R {
    let mut guard = db.blocking_write();
    f(&mut guard)
}

#[test]
fn queue_and_cancel_lifecycle() {
    let (url, db) = start_server(MockState::new());
    let client = client(&url);

    // Step 1: enqueue with parameters and both dependency kinds.
    let input = NewBuild::new("MyPipeline")
        .branch("main")
        .comment("triggered")
        .properties(parse_properties(&["ENV=prod", "DEBUG=0"]).unwrap())
        .snapshot_dependencies(parse_dependencies(&["Lib_Build=11"]).unwrap())
        .artifact_dependencies(parse_dependencies(&["Assets_Build=12"]).unwrap());
    let id = client.start_build(&input).unwrap();
    assert_eq!(id, mock_server::FIRST_BUILD_ID);

    // Step 2: read it back; everything we sent round-trips.
    let details = client.get_build(id).unwrap();
    assert_eq!(details.build_type_id, "MyPipeline");
    assert_eq!(details.state, "queued");
    assert_eq!(details.branch_name, "main");
    assert_eq!(details.comment.text, "triggered");
    assert_eq!(details.properties.get("ENV"), Some("prod"));
    assert_eq!(details.properties.count, 2);
    assert_eq!(details.snapshot_dependencies.build[0].build_type_id, "Lib_Build");
    assert_eq!(details.snapshot_dependencies.build[0].id, 11);
    assert_eq!(details.artifact_dependencies.build[0].build_type_id, "Assets_Build");

    // Step 3: cancel while queued.
    client.cancel_queued_build(id, Some("no longer needed")).unwrap();
    with_state(&db, |state| {
        assert_eq!(state.last_stop_comment(), Some("no longer needed"));
        assert_eq!(state.build(id).unwrap().state, "finished");
    });

    // Step 4: cancelling again is a state error, not a transport error.
    let err = client.cancel_queued_build(id, None).unwrap_err();
    assert!(matches!(err, BuildServerError::InvalidState(_)), "{err:?}");
}

#[test]
fn cancel_of_running_build_is_invalid_state() {
    let mut state = MockState::new();
    let id = state.insert_build(Build::new("MyPipeline", "running"));
    let (url, _db) = start_server(state);

    let err = client(&url).cancel_queued_build(id, Some("too late")).unwrap_err();
    assert!(matches!(err, BuildServerError::InvalidState(_)), "{err:?}");
}

#[test]
fn stop_running_then_finished() {
    let mut state = MockState::new();
    let id = state.insert_build(Build::new("MyPipeline", "running"));
    let (url, db) = start_server(state);
    let client = client(&url);

    client.stop_build(id, Some("manual stop")).unwrap();
    with_state(&db, |state| {
        let build = state.build(id).unwrap();
        assert_eq!(build.state, "finished");
        assert!(build.canceled);
    });

    let err = client.stop_build(id, None).unwrap_err();
    assert!(matches!(err, BuildServerError::InvalidState(_)), "{err:?}");

    let err = client.stop_build(9_999, None).unwrap_err();
    assert!(matches!(err, BuildServerError::NotFound(_)), "{err:?}");
}

#[test]
fn get_missing_build_is_not_found() {
    let (url, _db) = start_server(MockState::new());
    let err = client(&url).get_build(404).unwrap_err();
    assert!(matches!(err, BuildServerError::NotFound(_)), "{err:?}");
}

#[test]
fn wrong_token_is_unexpected_status() {
    let (url, _db) = start_server(MockState::new());
    let config = TransportConfig::new(&url, "wrong");
    let client = BuildServerClient::connect(&config).unwrap();
    let err = client.get_build(1).unwrap_err();
    assert!(
        matches!(err, BuildServerError::UnexpectedStatus { status: 401, .. }),
        "{err:?}"
    );
}

#[test]
fn list_builds_with_filters() {
    let mut state = MockState::new();
    for (pipeline, branch, status) in [
        ("App_Build", "main", "SUCCESS"),
        ("App_Build", "main", "FAILURE"),
        ("App_Build", "feature/login", "SUCCESS"),
        ("App_Build", "main", "SUCCESS"),
        ("Lib_Build", "main", "SUCCESS"),
    ] {
        let mut build = Build::new(pipeline, "finished");
        build.branch_name = Some(branch.to_string());
        build.status = Some(status.to_string());
        state.insert_build(build);
    }
    let (url, _db) = start_server(state);
    let client = client(&url);

    let query = BuildListQuery::new()
        .pipeline("App_Build")
        .branch("main")
        .status("success")
        .unwrap();
    let result = client.list_builds(&query).unwrap();
    let ids: Vec<u64> = result.builds.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![103, 100]);
    assert_eq!(result.count, 2);

    // Branch names with a slash survive query encoding.
    let query = BuildListQuery::new().branch("feature/login");
    let result = client.list_builds(&query).unwrap();
    assert_eq!(result.builds.len(), 1);
    assert_eq!(result.builds[0].branch_name, "feature/login");

    // Page 2 of size 2 over all five builds.
    let result = client
        .list_builds(&BuildListQuery::new().with_page(2, 2))
        .unwrap();
    let ids: Vec<u64> = result.builds.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![102, 101]);
    assert!(result.next_href.is_some());
}

#[test]
fn branch_with_locator_syntax_matches_only_itself() {
    let mut state = MockState::new();
    for (branch, status) in [("release", "FAILURE"), ("release,status:FAILURE", "SUCCESS")] {
        let mut build = Build::new("App_Build", "finished");
        build.branch_name = Some(branch.to_string());
        build.status = Some(status.to_string());
        state.insert_build(build);
    }
    let (url, _db) = start_server(state);

    let query = BuildListQuery::new().branch("release,status:FAILURE");
    let result = client(&url).list_builds(&query).unwrap();
    assert_eq!(result.builds.len(), 1);
    assert_eq!(result.builds[0].branch_name, "release,status:FAILURE");
    assert_eq!(result.builds[0].status, "SUCCESS");
}

#[test]
fn silent_server_fails_with_transport_timeout() {
    // Accepts connections and never answers.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming().flatten() {
            held.push(stream);
        }
    });

    let config = TransportConfig::new(format!("http://{addr}"), TOKEN)
        .with_timeouts(Duration::from_millis(500));
    let client = BuildServerClient::connect(&config).unwrap();

    let started = Instant::now();
    let err = client.get_build(1).unwrap_err();
    let elapsed = started.elapsed();
    assert_eq!(err.kind(), ErrorKind::TransportTimeout, "{err}");
    assert!(err.is_transport());
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
}

#[test]
fn invalid_status_fails_before_network() {
    let err = BuildListQuery::new().status("passed").unwrap_err();
    assert!(matches!(err, BuildServerError::InvalidArgument(_)));
}

#[test]
fn artifact_bytes_and_content_type_are_verbatim() {
    let mut state = MockState::new();
    let id = state.insert_build(Build::new("MyPipeline", "finished"));
    let payload: Vec<u8> = (0u8..=255).collect();
    state.add_artifact(id, "dist/app.bin", "application/x-custom; v=2", &payload);
    state.add_artifact(id, "reports/unit tests.xml", "application/xml", b"<ok/>");
    let (url, _db) = start_server(state);
    let client = client(&url);

    let artifact = client.get_artifact_text_file("dist/app.bin", id).unwrap();
    assert_eq!(artifact.content, payload);
    assert_eq!(
        artifact.content_type.as_deref(),
        Some("application/x-custom; v=2")
    );

    let artifact = client
        .get_artifact_text_file("/reports/unit tests.xml", id)
        .unwrap();
    assert_eq!(artifact.content, b"<ok/>");

    let err = client.get_artifact_text_file("missing.txt", id).unwrap_err();
    assert!(matches!(err, BuildServerError::NotFound(_)), "{err:?}");
}

#[test]
fn transport_is_shared_across_threads() {
    let mut state = MockState::new();
    let id = state.insert_build(Build::new("MyPipeline", "finished"));
    let (url, _db) = start_server(state);

    let transport =
        Arc::new(TransportClient::new(&TransportConfig::new(&url, TOKEN)).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let client = BuildServerClient::new(Arc::clone(&transport));
            std::thread::spawn(move || client.get_build(id).unwrap().id)
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), id);
    }
}
