use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use httpmock::prelude::*;
use pritunl_api::reqwest::Client as HttpClient;
use pritunl_api::reqwest::header::{HeaderMap, HeaderValue};
use pritunl_api::{
    Authenticator, Client, ClientConfig, ConfigStreamOptions, EntityRef, Error, Outcome, Session,
    UserOverrides,
};
use serde_json::json;

/// Issues `x-test-session: <n>` for the n-th login.
#[derive(Clone, Default)]
struct CountingLogin {
    logins: Arc<AtomicUsize>,
}

#[async_trait]
impl Authenticator for CountingLogin {
    async fn login(&self, _http: &HttpClient, _base_url: &str) -> pritunl_api::Result<Session> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        let mut headers = HeaderMap::new();
        headers.insert("x-test-session", HeaderValue::from(n));
        Ok(Session::new(headers, None))
    }
}

fn client(server: &MockServer) -> (Client, Arc<AtomicUsize>) {
    let login = CountingLogin::default();
    let logins = Arc::clone(&login.logins);
    let client = Client::with_authenticator(server.base_url(), login).unwrap();
    (client, logins)
}

const PROFILE: &str = "#{\"user\": \"bob\"}\nclient\ndev tun\n<key>\nSECRET\n</key>\n";

fn tar_body() -> String {
    format!("bob.ovpn\0\0\0\0ustar  {}\0\0\0\0", PROFILE)
}

#[tokio::test]
async fn password_login_attaches_cookie_and_csrf_token() {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/auth/session")
                .json_body(json!({"username": "admin", "password": "pw"}));
            then.status(200)
                .header("set-cookie", "session=abc; Path=/; HttpOnly")
                .json_body(json!({"authenticated": true}));
        })
        .await;
    let state = server
        .mock_async(|when, then| {
            when.method(GET).path("/state").header("cookie", "session=abc");
            then.status(200).json_body(json!({"csrf_token": "tok"}));
        })
        .await;
    let servers = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/server")
                .header("cookie", "session=abc")
                .header("csrf-token", "tok");
            then.status(200)
                .json_body(json!([{"id": "s1", "name": "east", "status": "online"}]));
        })
        .await;

    let client = Client::from_config(ClientConfig::new(server.base_url(), "admin", "pw")).unwrap();
    let first = client.servers().list().await.unwrap();
    let second = client.servers().list().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first[0].name, "east");
    assert_eq!(first[0].status.as_deref(), Some("online"));
    assert_eq!(login.hits_async().await, 1);
    assert_eq!(state.hits_async().await, 1);
    assert_eq!(servers.hits_async().await, 2);
}

#[tokio::test]
async fn rejected_login_is_an_auth_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/auth/session");
            then.status(401).json_body(json!({"error": "auth_invalid"}));
        })
        .await;
    let orgs = server
        .mock_async(|when, then| {
            when.method(GET).path("/organization");
            then.status(200).json_body(json!([]));
        })
        .await;

    let client = Client::from_config(ClientConfig::new(server.base_url(), "admin", "bad")).unwrap();
    let err = client.organizations().list().await.unwrap_err();

    assert!(matches!(err, Error::Auth(_)), "{err:?}");
    assert_eq!(orgs.hits_async().await, 0);
}

#[tokio::test]
async fn rejected_session_is_refreshed_and_replayed_once() {
    let server = MockServer::start_async().await;
    let stale = server
        .mock_async(|when, then| {
            when.method(GET).path("/organization").header("x-test-session", "1");
            then.status(401);
        })
        .await;
    let fresh = server
        .mock_async(|when, then| {
            when.method(GET).path("/organization").header("x-test-session", "2");
            then.status(200)
                .json_body(json!([{"id": "o1", "name": "Default Org", "user_count": 3}]));
        })
        .await;

    let (client, logins) = client(&server);
    let org = client.organizations().find_default().await.unwrap().unwrap();

    assert_eq!(org.id, "o1");
    assert_eq!(org.user_count, Some(3));
    assert_eq!(logins.load(Ordering::SeqCst), 2);
    assert_eq!(stale.hits_async().await, 1);
    assert_eq!(fresh.hits_async().await, 1);
}

#[tokio::test]
async fn second_rejection_is_not_retried() {
    let server = MockServer::start_async().await;
    let always = server
        .mock_async(|when, then| {
            when.method(GET).path("/server");
            then.status(401);
        })
        .await;

    let (client, logins) = client(&server);
    let err = client.servers().list().await.unwrap_err();

    assert!(matches!(err, Error::Auth(_)), "{err:?}");
    assert_eq!(logins.load(Ordering::SeqCst), 2);
    assert_eq!(always.hits_async().await, 2);
}

#[tokio::test]
async fn slow_responses_hit_the_configured_timeout() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/server");
            then.status(200)
                .delay(Duration::from_millis(500))
                .json_body(json!([]));
        })
        .await;

    let (client, _) = client(&server);
    let client = client.with_timeout(Duration::from_millis(50));
    let err = client.servers().list().await.unwrap_err();

    assert!(matches!(err, Error::Network(ref e) if e.is_timeout()), "{err:?}");
}

#[tokio::test]
async fn session_ttl_bounds_how_long_a_login_is_reused() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/server");
            then.status(200).json_body(json!([]));
        })
        .await;

    let (client, logins) = client(&server);
    let client = client.with_session_ttl(Duration::ZERO);
    client.servers().list().await.unwrap();
    client.servers().list().await.unwrap();

    assert_eq!(logins.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn lookups_map_404_to_none_and_propagate_other_statuses() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/user/o1/missing");
            then.status(404)
                .json_body(json!({"error": "user_not_found", "error_msg": "User not found."}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/user/o1/broken");
            then.status(500).body("boom");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/user/o1/u1");
            then.status(200)
                .json_body(json!({"id": "u1", "name": "alice", "organization": "o1"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/organization/gone");
            then.status(404);
        })
        .await;

    let (client, _) = client(&server);
    let users = client.users();

    assert_eq!(users.get_by_id("o1", "missing").await.unwrap(), None);
    let found = users.get_by_id("o1", "u1").await.unwrap().unwrap();
    assert_eq!(found.name, "alice");

    let err = users.get_by_id("o1", "broken").await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert!(err.to_string().contains("boom"));

    assert_eq!(client.organizations().get_by_id("gone").await.unwrap(), None);
}

#[tokio::test]
async fn find_sends_search_and_default_limit() {
    let server = MockServer::start_async().await;
    let search = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/user/o1")
                .query_param("search", "bob")
                .query_param("limit", "25");
            then.status(200).json_body(json!({
                "search_limit": 25,
                "search_count": 1,
                "server_count": 2,
                "users": [{"id": "u2", "name": "bob"}]
            }));
        })
        .await;

    let (client, _) = client(&server);
    let found = client.users().find("o1", "bob", None).await.unwrap();

    search.assert_async().await;
    assert_eq!(found.limit, 25);
    assert_eq!(found.total_user_count, 1);
    assert_eq!(found.total_server_count, 2);
    assert_eq!(found.users[0].id, "u2");
}

#[tokio::test]
async fn create_merges_defaults_and_expects_a_single_user() {
    let server = MockServer::start_async().await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST).path("/user/o1").json_body(json!({
                "name": "alice",
                "email": "alice@example.com",
                "disabled": false,
                "yubico_id": "",
                "groups": [],
                "pin": "",
                "network_links": [],
                "bypass_secondary": false,
                "client_to_client": false,
                "dns_servers": [],
                "dns_suffix": "",
                "port_forwarding": []
            }));
            then.status(200)
                .json_body(json!([{"id": "u1", "name": "alice", "servers": null}]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/user/o2");
            then.status(200).json_body(json!([{"id": "a"}, {"id": "b"}]));
        })
        .await;

    let (client, _) = client(&server);
    let overrides = UserOverrides {
        name: Some("alice".into()),
        email: Some("alice@example.com".into()),
        ..Default::default()
    };

    let user = client.users().create("o1", &overrides).await.unwrap();
    create.assert_async().await;
    assert_eq!(user.id, "u1");
    assert!(user.servers.is_empty());

    let err = client.users().create("o2", &overrides).await.unwrap_err();
    assert!(matches!(err, Error::UnexpectedResponse(_)), "{err:?}");
}

#[tokio::test]
async fn update_sends_user_with_changes() {
    let server = MockServer::start_async().await;
    let update = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/user/o1/u1")
                .json_body_partial(r#"{"id": "u1", "name": "alice", "disabled": true}"#);
            then.status(200)
                .json_body(json!({"id": "u1", "name": "alice", "disabled": true}));
        })
        .await;

    let (client, _) = client(&server);
    let current = pritunl_api::User {
        id: "u1".into(),
        name: "alice".into(),
        ..Default::default()
    };
    let changes = UserOverrides {
        disabled: Some(true),
        ..Default::default()
    };

    let updated = client.users().update("o1", &current, &changes).await.unwrap();
    update.assert_async().await;
    assert!(updated.disabled);
}

#[tokio::test]
async fn config_stream_is_named_from_content_disposition() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/key/o1/u1/s1.key");
            then.status(200)
                .header("content-disposition", "attachment; filename=\"bob.ovpn\"")
                .body(PROFILE);
        })
        .await;

    let (client, _) = client(&server);
    let download = client
        .keys()
        .client_config_stream("o1", "u1", &ConfigStreamOptions::server("s1"))
        .await
        .unwrap();

    assert_eq!(download.file_name, "bob.ovpn");
    assert_eq!(download.file_size, Some(PROFILE.len() as u64));
    let body = download.stream.collect_bytes().await.unwrap();
    assert_eq!(body, PROFILE.as_bytes());
}

#[tokio::test]
async fn config_stream_without_disposition_fails_fast() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/key/o1/u1.zip");
            then.status(200).json_body(json!({"error": "unexpected"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/key/o1/u2.zip");
            then.status(404);
        })
        .await;

    let (client, _) = client(&server);
    let keys = client.keys();

    let err = keys
        .client_config_stream("o1", "u1", &ConfigStreamOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedDownload(_)), "{err:?}");

    let err = keys
        .client_config_stream("o1", "u2", &ConfigStreamOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "{err:?}");
}

#[tokio::test]
async fn save_client_config_writes_announced_file() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/key/o1/u1.tar");
            then.status(200)
                .header("content-disposition", "attachment; filename=\"../bob.tar\"")
                .body(tar_body());
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (client, _) = client(&server);
    let path = client
        .keys()
        .save_client_config(
            "o1",
            "u1",
            &ConfigStreamOptions::archive(pritunl_api::ArchiveFormat::Tar),
            dir.path(),
        )
        .await
        .unwrap();

    assert_eq!(path, dir.path().join("bob.tar"));
    assert_eq!(std::fs::read_to_string(path).unwrap(), tar_body());
}

#[tokio::test]
async fn delete_many_isolates_failures_in_input_order() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(DELETE).path("/user/o1/1");
            then.status(200).json_body(json!({}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(DELETE).path("/user/o1/2");
            then.status(500);
        })
        .await;

    let (client, _) = client(&server);
    let results = client
        .users()
        .delete_many(
            "o1",
            vec![EntityRef::new("1", "alice"), EntityRef::new("2", "bob")],
        )
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].item.id, "1");
    assert_eq!(results[0].outcome, Outcome::Success(()));
    assert_eq!(results[1].item.id, "2");
    assert_eq!(results[1].outcome.failure().unwrap().status, Some(500));
}

#[tokio::test]
async fn bulk_profile_download_disambiguates_names() {
    let server = MockServer::start_async().await;
    for id in ["1", "2"] {
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("/key/o1/{}.tar", id));
                then.status(200)
                    .header("content-disposition", format!("attachment; filename=\"{}.tar\"", id))
                    .body(tar_body());
            })
            .await;
    }
    server
        .mock_async(|when, then| {
            when.method(GET).path("/key/o1/3.tar");
            then.status(404);
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (client, _) = client(&server);
    let results = client
        .keys()
        .download_users_client_configs(
            "o1",
            vec![
                EntityRef::new("1", "bob"),
                EntityRef::new("2", "bob"),
                EntityRef::new("3", "carol"),
            ],
            dir.path(),
        )
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].outcome.success(), Some(&dir.path().join("bob.ovpn")));
    assert_eq!(results[1].outcome.success(), Some(&dir.path().join("bob-2.ovpn")));
    assert_eq!(results[2].outcome.failure().unwrap().status, Some(404));

    assert_eq!(std::fs::read_to_string(dir.path().join("bob.ovpn")).unwrap(), PROFILE);
    assert_eq!(std::fs::read_to_string(dir.path().join("bob-2.ovpn")).unwrap(), PROFILE);
    assert!(!dir.path().join("carol.ovpn").exists());
}

#[tokio::test]
async fn repeated_user_gets_its_own_profile_file() {
    let server = MockServer::start_async().await;
    let archive = server
        .mock_async(|when, then| {
            when.method(GET).path("/key/o1/1.tar");
            then.status(200)
                .header("content-disposition", "attachment; filename=\"1.tar\"")
                .body(tar_body());
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (client, _) = client(&server);
    let results = client
        .keys()
        .download_users_client_configs(
            "o1",
            vec![EntityRef::new("1", "bob"), EntityRef::new("1", "bob")],
            dir.path(),
        )
        .await;

    let first = results[0].outcome.success().unwrap();
    let second = results[1].outcome.success().unwrap();
    assert_ne!(first, second);
    assert_eq!(first, &dir.path().join("bob.ovpn"));
    assert_eq!(second, &dir.path().join("bob-1.ovpn"));
    assert_eq!(std::fs::read_to_string(second).unwrap(), PROFILE);
    assert_eq!(archive.hits_async().await, 2);
}

#[tokio::test]
async fn audit_logs_are_written_when_directory_exists() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/user/o1/1/audit");
            then.status(200)
                .json_body(json!([{"type": "user_profile", "message": "profile downloaded"}]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/user/o1/2/audit");
            then.status(403);
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (client, _) = client(&server);
    let results = client
        .users()
        .audit_logs(
            "o1",
            vec![EntityRef::new("1", "alice"), EntityRef::new("2", "bob")],
            Some(dir.path()),
        )
        .await;

    assert!(results[0].outcome.is_success());
    assert_eq!(results[1].outcome.failure().unwrap().status, Some(403));

    let written: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("alice-log.json")).unwrap()).unwrap();
    assert_eq!(written[0]["message"], "profile downloaded");
    assert!(!dir.path().join("bob-log.json").exists());
}
