// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::disallowed_macros,
    clippy::uninlined_format_args
)]

use async_trait::async_trait;
use axum::http::StatusCode;
use callrelay_api::{DeliveryMode, RecordingEntry, ServerEvent};
use callrelay_core::{CallRecord, SystemKind};
use callrelay_server::config::SystemConfig;
use callrelay_server::dispatch::{DispatchError, Dispatcher, WebhookNotifier};
use callrelay_server::state::AppState;
use callrelay_server::Config;
use reqwest::multipart;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::time::{timeout, Duration};

const AUDIO: &[u8] = b"ID3\x03\x00fake-mp3-frames";

#[derive(Default)]
struct RecordingWebhook {
    talkgroups: Mutex<Vec<String>>,
}

#[async_trait]
impl WebhookNotifier for RecordingWebhook {
    async fn send_call_message(&self, record: &CallRecord) -> Result<(), DispatchError> {
        self.talkgroups.lock().unwrap().push(record.talkgroup_id().to_string());
        Ok(())
    }

    async fn send_transcription_message(
        &self,
        _record: &CallRecord,
        _text: &str,
    ) -> Result<(), DispatchError> {
        Ok(())
    }
}

fn system(id: &str, alias: &str, key: &str) -> SystemConfig {
    SystemConfig {
        id: id.to_string(),
        alias: alias.to_string(),
        kind: SystemKind::Sdrtrunk,
        api_key: key.to_string(),
        enabled: true,
        address: None,
        port: None,
    }
}

fn test_config(upload_dir: &Path, systems: Vec<SystemConfig>) -> Config {
    let mut config = Config::default();
    config.storage.upload_dir = upload_dir.display().to_string();
    config.peerlink.enabled = false;
    config.systems = systems;
    config
}

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    webhook: Arc<RecordingWebhook>,
    _upload_dir: tempfile::TempDir,
    upload_path: PathBuf,
}

async fn start_test_server(systems: Vec<SystemConfig>) -> Option<TestServer> {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => return None,
        Err(e) => panic!("Failed to bind test server listener: {e}"),
    };
    let addr = listener.local_addr().unwrap();

    let upload_dir = tempfile::tempdir().unwrap();
    let upload_path = upload_dir.path().to_path_buf();
    let webhook = Arc::new(RecordingWebhook::default());
    let dispatcher =
        Dispatcher::disabled().with_webhook(Arc::clone(&webhook) as Arc<dyn WebhookNotifier>, true);

    let (app, state) = callrelay_server::create_app_with_dispatcher(
        test_config(&upload_path, systems),
        dispatcher,
    )
    .unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });

    Some(TestServer { addr, state, webhook, _upload_dir: upload_dir, upload_path })
}

fn p25_form(system: &str, key: &str, talkgroup: &str) -> multipart::Form {
    multipart::Form::new()
        .text("system", system.to_string())
        .text("key", key.to_string())
        .text("talkgroup", talkgroup.to_string())
        .text("source", "123456")
        .text("frequency", "851012500")
        .text("dateTime", "1700000000")
        .text("talkgroupLabel", "Fire Dispatch")
        .part(
            "audio",
            multipart::Part::bytes(AUDIO.to_vec()).file_name("call.mp3").mime_str("audio/mpeg").unwrap(),
        )
}

async fn upload(addr: SocketAddr, form: multipart::Form) -> (StatusCode, String) {
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/call-upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    let status = response.status();
    (status, response.text().await.unwrap())
}

/// Regular files below `dir`, ignoring the hidden staging directory.
fn stored_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn p25_upload_is_stored_published_and_dispatched() {
    let Some(server) = start_test_server(vec![system("7", "county", "K1")]).await else {
        eprintln!("Skipping call upload tests: local TCP bind not permitted");
        return;
    };
    let mut subscription = server.state.broadcaster.subscribe();
    let first = subscription.recv().await.unwrap();
    assert_eq!(*first, ServerEvent::UserCount(1));

    let (status, body) = upload(server.addr, p25_form("7", "K1", "100")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Call imported successfully.\n");

    let expected = server.upload_path.join("county/100/2023-11-14/22-13-20.mp3");
    assert_eq!(std::fs::read(&expected).unwrap(), AUDIO);
    assert_eq!(stored_files(&server.upload_path), vec![expected]);

    let event = timeout(Duration::from_secs(2), subscription.recv()).await.unwrap().unwrap();
    let ServerEvent::NewCall(new_call) = event.as_ref() else {
        panic!("expected new_call, got {event:?}");
    };
    assert_eq!(new_call.delivery, DeliveryMode::AudioUrl);
    assert_eq!(new_call.audio, "/uploads/county/100/2023-11-14/22-13-20.mp3");
    assert_eq!(new_call.call.mode().to_string(), "P25_SDRTRUNK");
    assert_eq!(new_call.call.talkgroup_id(), "100");
    assert_eq!(new_call.call.talkgroup_label(), "Fire Dispatch");

    settle().await;
    assert_eq!(*server.webhook.talkgroups.lock().unwrap(), vec!["100".to_string()]);

    // The stored artifact is served under the public prefix.
    let served = reqwest::get(format!("http://{}{}", server.addr, new_call.audio)).await.unwrap();
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(served.bytes().await.unwrap().as_ref(), AUDIO);
}

#[tokio::test]
async fn wrong_key_is_rejected_without_side_effects() {
    let Some(server) = start_test_server(vec![system("7", "county", "K1")]).await else {
        return;
    };
    let mut subscription = server.state.broadcaster.subscribe();
    subscription.recv().await.unwrap();

    for (system_id, key) in [("7", "k1"), ("7", "wrong"), ("8", "K1"), ("", "")] {
        let (status, body) = upload(server.addr, p25_form(system_id, key, "100")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{system_id}/{key}");
        assert_eq!(body, "Invalid API key or System ID");
    }

    settle().await;
    assert!(stored_files(&server.upload_path).is_empty());
    assert!(server.webhook.talkgroups.lock().unwrap().is_empty());
    assert!(timeout(Duration::from_millis(100), subscription.recv()).await.is_err());
}

#[tokio::test]
async fn missing_keys_never_authorize() {
    // A system configured without a key is refused at startup.
    let dir = tempfile::tempdir().unwrap();
    let keyless = test_config(dir.path(), vec![system("7", "county", "")]);
    assert!(callrelay_server::create_app_with_dispatcher(keyless, Dispatcher::disabled()).is_err());

    let Some(server) = start_test_server(vec![system("7", "county", "K1")]).await else {
        return;
    };
    let no_key = multipart::Form::new()
        .text("system", "7")
        .text("talkgroup", "100")
        .text("source", "123456")
        .text("frequency", "851012500")
        .text("dateTime", "1700000000")
        .part("audio", multipart::Part::bytes(AUDIO.to_vec()).file_name("call.mp3"));
    let (status, body) = upload(server.addr, no_key).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, "Invalid API key or System ID");

    let (status, _) = upload(server.addr, p25_form("7", "", "100")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    settle().await;
    assert!(stored_files(&server.upload_path).is_empty());
    assert!(server.webhook.talkgroups.lock().unwrap().is_empty());
}

#[tokio::test]
async fn connection_tests_store_nothing() {
    let Some(server) = start_test_server(vec![system("7", "county", "K1")]).await else {
        return;
    };
    let mut subscription = server.state.broadcaster.subscribe();
    subscription.recv().await.unwrap();

    let connection_test = multipart::Form::new().text("system", "7").text("key", "K1").text("test", "1");
    let (status, body) = upload(server.addr, connection_test).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "incomplete call data: no talkgroup");

    // A connection test carrying audio is still only a test, whether the flag comes after
    // the file part or before it.
    let (status, _) = upload(server.addr, p25_form("7", "K1", "100").text("test", "true")).await;
    assert_eq!(status, StatusCode::OK);
    let flag_first = multipart::Form::new()
        .text("test", "yes")
        .text("system", "7")
        .text("key", "K1")
        .part("audio", multipart::Part::bytes(AUDIO.to_vec()).file_name("call.mp3"));
    let (status, body) = upload(server.addr, flag_first).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "incomplete call data: no talkgroup");

    settle().await;
    assert!(stored_files(&server.upload_path).is_empty());
    let staged = std::fs::read_dir(server.upload_path.join(".incoming"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(staged, 0);
    assert!(timeout(Duration::from_millis(100), subscription.recv()).await.is_err());
}

#[tokio::test]
async fn upload_without_audio_is_a_bad_request() {
    let Some(server) = start_test_server(vec![system("7", "county", "K1")]).await else {
        return;
    };
    let form = multipart::Form::new().text("system", "7").text("key", "K1").text("talkgroup", "100");
    let (status, _) = upload(server.addr, form).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(stored_files(&server.upload_path).is_empty());
}

#[tokio::test]
async fn same_second_calls_do_not_overwrite_each_other() {
    let Some(server) = start_test_server(vec![system("7", "county", "K1")]).await else {
        return;
    };
    for _ in 0..2 {
        let (status, _) = upload(server.addr, p25_form("7", "K1", "100")).await;
        assert_eq!(status, StatusCode::OK);
    }
    let dir = server.upload_path.join("county/100/2023-11-14");
    assert_eq!(
        stored_files(&server.upload_path),
        vec![dir.join("22-13-20.mp3"), dir.join("22-13-20_1.mp3")]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_systems_land_in_their_own_directories() {
    let systems: Vec<_> =
        (1..=8).map(|n| system(&n.to_string(), &format!("system-{n}"), &format!("key-{n}"))).collect();
    let Some(server) = start_test_server(systems).await else {
        return;
    };
    let mut subscription = server.state.broadcaster.subscribe();
    subscription.recv().await.unwrap();

    let uploads = (1..=8).map(|n| {
        let addr = server.addr;
        tokio::spawn(async move {
            upload(addr, p25_form(&n.to_string(), &format!("key-{n}"), &(100 + n).to_string())).await
        })
    });
    for result in futures_util::future::join_all(uploads).await {
        assert_eq!(result.unwrap().0, StatusCode::OK);
    }

    let files = stored_files(&server.upload_path);
    assert_eq!(files.len(), 8);
    for n in 1..=8 {
        let expected = server
            .upload_path
            .join(format!("system-{n}/{}/2023-11-14/22-13-20.mp3", 100 + n));
        assert!(files.contains(&expected), "missing {}", expected.display());
    }

    let mut talkgroups = Vec::new();
    for _ in 0..8 {
        let event = timeout(Duration::from_secs(2), subscription.recv()).await.unwrap().unwrap();
        if let ServerEvent::NewCall(call) = event.as_ref() {
            talkgroups.push(call.call.talkgroup_id().to_string());
        }
    }
    talkgroups.sort();
    let expected: Vec<_> = (101..=108).map(|tg: u32| tg.to_string()).collect();
    assert_eq!(talkgroups, expected);
}

#[tokio::test]
async fn recordings_lists_uploads_and_rejects_traversal() {
    let Some(server) = start_test_server(vec![system("7", "county", "K1")]).await else {
        return;
    };
    upload(server.addr, p25_form("7", "K1", "100")).await;
    upload(server.addr, p25_form("7", "K1", "200")).await;

    let addr = server.addr;
    let list = move |query: &'static str| async move {
        reqwest::get(format!("http://{addr}/api/recordings{query}"))
            .await
            .unwrap()
            .json::<Vec<RecordingEntry>>()
            .await
            .unwrap()
    };

    let systems = list("").await;
    assert_eq!(systems.len(), 1);
    assert_eq!((systems[0].filename.as_str(), systems[0].directory), ("county", true));

    let talkgroups = list("?system=county").await;
    let names: Vec<_> = talkgroups.iter().map(|e| e.filename.as_str()).collect();
    assert_eq!(names, ["100", "200"]);
    assert!(talkgroups.iter().all(|e| e.directory && e.date.is_empty()));

    let calls = list("?system=county&talkgroup=200&date=2023-11-14").await;
    assert_eq!(calls.len(), 1);
    assert!(!calls[0].directory);
    assert_eq!(calls[0].path, "/uploads/county/200/2023-11-14/22-13-20.mp3");

    let response =
        reqwest::get(format!("http://{}/api/recordings?talkgroup=200", server.addr)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response =
        reqwest::get(format!("http://{}/api/recordings?system=..%2F..%2Fetc", server.addr)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_connected_users() {
    let Some(server) = start_test_server(Vec::new()).await else {
        return;
    };
    let _subscription = server.state.broadcaster.subscribe();

    let response = reqwest::get(format!("http://{}/healthz", server.addr)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connected_users"], 1);
}
