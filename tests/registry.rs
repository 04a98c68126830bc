//! End-to-end tests driving a real registry against the `stub-lsp` binary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use lsp_registry::error::status;
use lsp_registry::models::config::{ServerConfig, ServerRequestPolicy};
use lsp_registry::{Event, EventKind, LspError, Registry, RegistryConfig, ServerState};

const STUB: &str = env!("CARGO_BIN_EXE_stub-lsp");
const ROOT: &str = "file:///proj";
const FILE: &str = "file:///proj/a.py";

fn config(servers: &[(&str, &[&str])]) -> RegistryConfig {
    let mut config = RegistryConfig::default();
    config.lsp.request_timeout_ms = 5_000;
    config.lsp.init_timeout_ms = 5_000;
    config.lsp.shutdown_grace_ms = 2_000;
    for (language, args) in servers {
        config
            .servers
            .insert(language.to_string(), ServerConfig::new(STUB, args));
    }
    config
}

fn registry(servers: &[(&str, &[&str])]) -> Registry {
    Registry::with_config(ROOT, &config(servers)).unwrap()
}

fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    done()
}

/// Drain events until one matches, returning everything drained.
fn drain_until(registry: &Registry, matches: impl Fn(&Event) -> bool) -> Vec<Event> {
    let mut seen = Vec::new();
    let found = wait_until(Duration::from_secs(5), || {
        while let Some(event) = registry.poll_event() {
            let hit = matches(&event);
            seen.push(event);
            if hit {
                return true;
            }
        }
        false
    });
    assert!(found, "expected event not seen; got {:?}", seen);
    seen
}

fn is_method(event: &Event, method: &str) -> bool {
    event.kind.method() == method
}

#[cfg(target_os = "linux")]
fn process_exists(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{}", pid)).exists()
}

#[test]
fn test_hover_scenario() {
    let registry = registry(&[("python", &["--stdio"])]);

    registry.ensure_servers("python", FILE).unwrap();
    assert_eq!(registry.server_state("python"), ServerState::Ready);

    let result = registry
        .request(
            "python",
            FILE,
            "textDocument/hover",
            Some(json!({
                "textDocument": { "uri": FILE },
                "position": { "line": 0, "character": 0 },
            })),
        )
        .unwrap();
    assert_eq!(
        result["contents"]["value"],
        format!("stub hover for {}", FILE)
    );

    let pid = registry.server_pid("python").unwrap();
    let started = Instant::now();
    registry.shutdown_all().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(registry.languages().is_empty());
    #[cfg(target_os = "linux")]
    assert!(wait_until(Duration::from_secs(1), || !process_exists(pid)));
    let _ = pid;
}

#[test]
fn test_request_json_returns_raw_result() {
    let registry = registry(&[("python", &[])]);
    let out = registry.request_json("python", FILE, "stub/echo", Some(r#"{"a":[1,2]}"#));
    assert_eq!(serde_json::from_str::<Value>(&out).unwrap(), json!({"a": [1, 2]}));
}

#[test]
fn test_ensure_is_idempotent() {
    let registry = registry(&[("python", &[])]);

    registry.ensure_servers("python", FILE).unwrap();
    let pid = registry.server_pid("python").unwrap();
    for _ in 0..3 {
        registry.ensure_servers("python", FILE).unwrap();
        assert_eq!(registry.server_pid("python"), Some(pid));
    }
    assert_eq!(registry.languages(), vec!["python".to_string()]);

    let initialized = std::iter::from_fn(|| registry.poll_event())
        .filter(|e| matches!(e.kind, EventKind::Initialized { .. }))
        .count();
    assert_eq!(initialized, 1);
}

#[test]
fn test_concurrent_ensure_starts_one_process() {
    let registry = Arc::new(registry(&[("python", &[])]));

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let registry = Arc::clone(&registry);
            scope.spawn(move || registry.ensure_servers("python", FILE).unwrap());
        }
    });

    let pids: Vec<u64> = (0..3)
        .map(|_| {
            registry
                .request("python", FILE, "stub/pid", None)
                .unwrap()
                .as_u64()
                .unwrap()
        })
        .collect();
    assert!(pids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(registry.server_pid("python").map(u64::from), Some(pids[0]));
}

#[test]
fn test_initialized_event_carries_capabilities() {
    let registry = registry(&[("python", &[])]);
    registry.ensure_servers("python", FILE).unwrap();

    let event = registry.poll_event().unwrap();
    assert_eq!(event.language_id, "python");
    match event.kind {
        EventKind::Initialized {
            capabilities,
            server_info,
        } => {
            assert_eq!(capabilities["hoverProvider"], true);
            assert_eq!(server_info.unwrap()["name"], "stub-lsp");
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_notifications_arrive_in_order() {
    let registry = registry(&[("python", &[])]);

    let count = registry
        .request("python", FILE, "stub/burst", Some(json!({ "count": 50 })))
        .unwrap();
    assert_eq!(count, 50);

    let events = drain_until(&registry, |e| {
        matches!(&e.kind, EventKind::Notification { method, params }
            if method == "stub/tick" && params["n"] == 49)
    });

    let ticks: Vec<u64> = events
        .iter()
        .filter(|e| is_method(e, "stub/tick"))
        .map(|e| match &e.kind {
            EventKind::Notification { params, .. } => params["n"].as_u64().unwrap(),
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(ticks, (0..50).collect::<Vec<_>>());
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
}

#[test]
fn test_notify_is_fire_and_forget() {
    let registry = registry(&[("python", &[])]);
    registry.ensure_servers("python", FILE).unwrap();

    registry
        .notify(
            "python",
            FILE,
            "textDocument/didOpen",
            Some(json!({
                "textDocument": { "uri": FILE, "languageId": "python", "version": 1, "text": "" }
            })),
        )
        .unwrap();

    let events = drain_until(&registry, |e| {
        is_method(e, "textDocument/publishDiagnostics")
    });
    match &events.last().unwrap().kind {
        EventKind::Notification { params, .. } => assert_eq!(params["uri"], FILE),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_request_timeout_is_bounded() {
    let mut config = config(&[("python", &[])]);
    config.lsp.request_timeout_ms = 300;
    let registry = Registry::with_config(ROOT, &config).unwrap();
    registry.ensure_servers("python", FILE).unwrap();

    let started = Instant::now();
    let err = registry
        .request("python", FILE, "stub/sleep", Some(json!({})))
        .unwrap_err();
    let elapsed = started.elapsed();
    assert!(matches!(err, LspError::Timeout { .. }), "got {:?}", err);
    assert_eq!(err.status_code(), status::TIMEOUT);
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(300 + 2_000));

    // a late response is dropped and the connection keeps working
    let err = registry
        .request("python", FILE, "stub/sleep", Some(json!({ "ms": 600 })))
        .unwrap_err();
    assert!(matches!(err, LspError::Timeout { .. }));
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(
        registry
            .request("python", FILE, "stub/echo", Some(json!(7)))
            .unwrap(),
        7
    );
}

#[test]
fn test_concurrent_requests_complete_out_of_order() {
    let registry = Arc::new(registry(&[("python", &[])]));
    registry.ensure_servers("python", FILE).unwrap();

    let (slow_done, fast_done) = std::thread::scope(|scope| {
        let slow = {
            let registry = Arc::clone(&registry);
            scope.spawn(move || {
                let result = registry.request("python", FILE, "stub/sleep", Some(json!({ "ms": 800 })));
                (result, Instant::now())
            })
        };
        std::thread::sleep(Duration::from_millis(100));
        let fast = {
            let registry = Arc::clone(&registry);
            scope.spawn(move || {
                let result = registry.request("python", FILE, "stub/echo", Some(json!("fast")));
                (result, Instant::now())
            })
        };
        (slow.join().unwrap(), fast.join().unwrap())
    });

    assert_eq!(slow_done.0.unwrap(), json!({ "slept": 800 }));
    assert_eq!(fast_done.0.unwrap(), "fast");
    assert!(fast_done.1 < slow_done.1);
}

#[test]
fn test_crash_is_isolated_to_one_server() {
    let registry = registry(&[("python", &[]), ("rust", &[])]);
    registry.ensure_servers("python", FILE).unwrap();
    registry.ensure_servers("rust", "file:///proj/lib.rs").unwrap();

    let err = registry.request("python", FILE, "stub/crash", None).unwrap_err();
    assert!(matches!(err, LspError::ServerCrashed { .. }), "got {:?}", err);
    assert_eq!(err.status_code(), status::SERVER_CRASHED);
    assert_eq!(registry.server_state("python"), ServerState::Crashed);

    assert_eq!(
        registry
            .request("rust", "file:///proj/lib.rs", "stub/echo", Some(json!("alive")))
            .unwrap(),
        "alive"
    );
    assert_eq!(registry.server_state("rust"), ServerState::Ready);

    let events = drain_until(&registry, |e| {
        matches!(e.kind, EventKind::ServerExited { .. })
    });
    let exited = events.last().unwrap();
    assert_eq!(exited.language_id, "python");
    assert_eq!(exited.kind, EventKind::ServerExited { exit_code: Some(3) });
}

#[test]
fn test_crash_does_not_disturb_concurrent_requests() {
    let registry = registry(&[("python", &[]), ("rust", &[])]);
    registry.ensure_servers("python", FILE).unwrap();
    registry.ensure_servers("rust", "file:///proj/lib.rs").unwrap();

    let (slow, crashed) = std::thread::scope(|scope| {
        let slow = scope.spawn(|| {
            registry.request(
                "rust",
                "file:///proj/lib.rs",
                "stub/sleep",
                Some(json!({ "ms": 500 })),
            )
        });
        let crash = scope.spawn(|| {
            std::thread::sleep(Duration::from_millis(100));
            registry.request("python", FILE, "stub/crash", None)
        });
        (slow.join().unwrap(), crash.join().unwrap())
    });

    assert!(matches!(crashed, Err(LspError::ServerCrashed { .. })), "got {:?}", crashed);
    assert_eq!(slow.unwrap(), json!({ "slept": 500 }));
    assert_eq!(registry.server_state("rust"), ServerState::Ready);
    assert_eq!(registry.server_state("python"), ServerState::Crashed);
}

#[test]
fn test_crash_fails_outstanding_requests() {
    let registry = Arc::new(registry(&[("python", &[])]));
    registry.ensure_servers("python", FILE).unwrap();

    let started = Instant::now();
    let pending = std::thread::scope(|scope| {
        let waiter = {
            let registry = Arc::clone(&registry);
            scope.spawn(move || registry.request("python", FILE, "stub/sleep", Some(json!({}))))
        };
        std::thread::sleep(Duration::from_millis(200));
        let _ = registry.request("python", FILE, "stub/crash", None);
        waiter.join().unwrap()
    });

    assert!(matches!(pending, Err(LspError::ServerCrashed { .. })), "got {:?}", pending);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_restart_after_crash() {
    let registry = registry(&[("python", &[])]);
    registry.ensure_servers("python", FILE).unwrap();
    let first_pid = registry.server_pid("python").unwrap();

    let _ = registry.request("python", FILE, "stub/crash", None);
    assert_eq!(registry.server_state("python"), ServerState::Crashed);

    registry.ensure_servers("python", FILE).unwrap();
    assert_eq!(registry.server_state("python"), ServerState::Ready);
    let second_pid = registry.server_pid("python").unwrap();
    assert_ne!(first_pid, second_pid);
    assert_eq!(
        registry
            .request("python", FILE, "stub/echo", Some(json!(1)))
            .unwrap(),
        1
    );
}

#[test]
fn test_request_restarts_crashed_server() {
    let registry = registry(&[("python", &[])]);
    let _ = registry.request("python", FILE, "stub/crash", None);

    assert_eq!(
        registry
            .request("python", FILE, "stub/echo", Some(json!("back")))
            .unwrap(),
        "back"
    );
}

#[cfg(target_os = "linux")]
#[test]
fn test_dropping_registry_releases_processes() {
    let registry = registry(&[("python", &[]), ("rust", &[])]);
    registry.ensure_servers("python", FILE).unwrap();
    registry.ensure_servers("rust", FILE).unwrap();
    let pids = [
        registry.server_pid("python").unwrap(),
        registry.server_pid("rust").unwrap(),
    ];
    assert!(pids.iter().all(|&pid| process_exists(pid)));

    drop(registry);

    assert!(wait_until(Duration::from_secs(2), || {
        pids.iter().all(|&pid| !process_exists(pid))
    }));
}

#[cfg(target_os = "linux")]
#[test]
fn test_unresponsive_server_is_killed_after_grace() {
    let mut config = config(&[("python", &["--ignore-exit"])]);
    config.lsp.shutdown_grace_ms = 500;
    let registry = Registry::with_config(ROOT, &config).unwrap();
    registry.ensure_servers("python", FILE).unwrap();
    let pid = registry.server_pid("python").unwrap();

    let started = Instant::now();
    registry.shutdown_all().unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(400), "took {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
    assert!(wait_until(Duration::from_secs(1), || !process_exists(pid)));
}

#[test]
fn test_missing_executable_is_spawn_failure() {
    let mut config = config(&[]);
    config.servers.insert(
        "python".to_string(),
        ServerConfig::new("definitely-not-a-real-lsp-binary-4711", &["--stdio"]),
    );
    let registry = Registry::with_config(ROOT, &config).unwrap();

    let err = registry.ensure_servers("python", FILE).unwrap_err();
    assert_eq!(err.status_code(), status::SPAWN_FAILURE);

    let err = registry.ensure_servers("klingon", FILE).unwrap_err();
    assert_eq!(err.status_code(), status::UNSUPPORTED_LANGUAGE);

    let event = registry.poll_event().unwrap();
    assert!(matches!(event.kind, EventKind::ServerError { .. }));
    assert!(registry.shutdown_all().is_ok());
}

#[test]
fn test_handshake_timeout() {
    let mut config = config(&[("python", &["--hang-initialize"])]);
    config.lsp.init_timeout_ms = 300;
    let registry = Registry::with_config(ROOT, &config).unwrap();

    let started = Instant::now();
    let err = registry.ensure_servers("python", FILE).unwrap_err();
    assert!(matches!(err, LspError::HandshakeTimeout { .. }), "got {:?}", err);
    assert_eq!(err.status_code(), status::HANDSHAKE_FAILURE);
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(registry.server_state("python"), ServerState::NotStarted);
}

#[test]
fn test_rejected_handshake() {
    let registry = registry(&[("python", &["--reject-initialize"])]);

    let err = registry.ensure_servers("python", FILE).unwrap_err();
    assert!(matches!(err, LspError::Handshake { .. }), "got {:?}", err);
    assert_eq!(err.status_code(), status::HANDSHAKE_FAILURE);

    let event = registry.poll_event().unwrap();
    assert!(matches!(event.kind, EventKind::ServerError { .. }));
}

#[test]
fn test_malformed_frames_are_skipped() {
    let registry = registry(&[("python", &[])]);

    assert_eq!(
        registry.request("python", FILE, "stub/garbage", None).unwrap(),
        "ok"
    );
    assert_eq!(registry.server_state("python"), ServerState::Ready);
    assert_eq!(
        registry
            .request("python", FILE, "stub/echo", Some(json!([1])))
            .unwrap(),
        json!([1])
    );
}

#[test]
fn test_server_error_is_reported() {
    let registry = registry(&[("python", &[])]);

    let err = registry
        .request("python", FILE, "stub/error", Some(json!({ "why": "test" })))
        .unwrap_err();
    match &err {
        LspError::ServerError { code, data, .. } => {
            assert_eq!(*code, -32042);
            assert_eq!(data.as_ref().unwrap()["why"], "test");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let out = registry.request_json("python", FILE, "no/such/method", None);
    let value: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(value["error"]["code"], -32601);
    assert_eq!(value["error"]["kind"], "serverError");
}

#[test]
fn test_server_request_gets_default_reply() {
    let registry = registry(&[("python", &[])]);
    registry.request("python", FILE, "stub/askClient", None).unwrap();

    let events = drain_until(&registry, |e| is_method(e, "stub/clientReplied"));

    let asked = events
        .iter()
        .find(|e| matches!(e.kind, EventKind::ServerRequest { .. }))
        .expect("server request queued");
    assert_eq!(asked.kind.method(), "workspace/configuration");

    match &events.last().unwrap().kind {
        EventKind::Notification { params, .. } => {
            assert_eq!(params["result"], json!([{}, {}]));
            assert!(params["error"].is_null());
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_server_request_method_not_found_policy() {
    let mut config = config(&[("python", &[])]);
    config.lsp.server_requests = ServerRequestPolicy::MethodNotFound;
    let registry = Registry::with_config(ROOT, &config).unwrap();
    registry.request("python", FILE, "stub/askClient", None).unwrap();

    let events = drain_until(&registry, |e| is_method(e, "stub/clientReplied"));
    match &events.last().unwrap().kind {
        EventKind::Notification { params, .. } => {
            assert_eq!(params["error"]["code"], -32601)
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_event_json_shape() {
    let registry = registry(&[("python", &[])]);
    registry.ensure_servers("python", FILE).unwrap();

    let json: Value = serde_json::from_str(&registry.poll_event_json().unwrap()).unwrap();
    assert_eq!(json["type"], "initialized");
    assert_eq!(json["languageId"], "python");
    assert_eq!(json["serverInfo"]["name"], "stub-lsp");
    assert!(json["seq"].is_u64());
}

#[test]
fn test_close_is_idempotent_and_final() {
    let registry = registry(&[("python", &[])]);
    registry.ensure_servers("python", FILE).unwrap();

    registry.close();
    registry.close();

    let err = registry.ensure_servers("python", FILE).unwrap_err();
    assert_eq!(err.status_code(), status::REGISTRY_CLOSED);
    assert!(registry.languages().is_empty());
}

#[test]
fn test_registry_is_usable_after_shutdown_all() {
    let registry = registry(&[("python", &[])]);
    registry.ensure_servers("python", FILE).unwrap();
    registry.shutdown_all().unwrap();
    assert_eq!(registry.server_state("python"), ServerState::NotStarted);

    registry.ensure_servers("python", FILE).unwrap();
    assert_eq!(registry.server_state("python"), ServerState::Ready);
}

#[test]
fn test_shutdown_all_stops_server_still_starting() {
    let mut config = config(&[]);
    let script = format!("sleep 0.6; exec {} --stdio", STUB);
    config
        .servers
        .insert("python".to_string(), ServerConfig::new("sh", &["-c", &script]));
    let registry = Registry::with_config(ROOT, &config).unwrap();

    let ensured = std::thread::scope(|scope| {
        let starter = scope.spawn(|| registry.ensure_servers("python", FILE));
        assert!(wait_until(Duration::from_secs(2), || {
            registry.server_state("python") == ServerState::Starting
        }));

        registry.shutdown_all().unwrap();
        // nothing may come back up behind shutdown_all
        assert_eq!(registry.server_state("python"), ServerState::NotStarted);
        assert!(registry.languages().is_empty());
        assert_eq!(registry.server_pid("python"), None);

        starter.join().unwrap()
    });

    let err = ensured.unwrap_err();
    assert!(matches!(err, LspError::RequestCancelled), "got {:?}", err);
    assert_eq!(err.status_code(), status::NOT_CONNECTED);
    assert!(registry.languages().is_empty());

    registry.ensure_servers("python", FILE).unwrap();
    assert_eq!(registry.server_state("python"), ServerState::Ready);
}
