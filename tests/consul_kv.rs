//! HTTP-level tests for the Consul client.
//!
//! A wiremock server stands in for the Consul agent.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use consulkv::core::{Connection, Environment, ErrorKind, KeyPath, ModifyIndex};
use consulkv::engine::SnapshotLoader;
use consulkv::kv::consul::ConsulKv;
use consulkv::kv::{KvError, KvStore};

// =============================================================================
// Fixtures
// =============================================================================

fn connection(server: &MockServer) -> Connection {
    Connection {
        address: server.uri(),
        token: Some("s3cr3t".to_string()),
        datacenter: None,
        timeout: Duration::from_secs(2),
    }
}

fn client(server: &MockServer) -> ConsulKv {
    ConsulKv::new(&connection(server)).unwrap()
}

fn pair(key: &str, value: &str, index: u64) -> serde_json::Value {
    json!({
        "Key": key,
        "Value": STANDARD.encode(value),
        "CreateIndex": index,
        "ModifyIndex": index,
        "LockIndex": 0,
        "Flags": 0,
    })
}

// =============================================================================
// Reads
// =============================================================================

mod reads {
    use super::*;

    #[tokio::test]
    async fn list_under_decodes_values_and_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/dev/"))
            .and(query_param("recurse", "true"))
            .and(header("X-Consul-Token", "s3cr3t"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Consul-Index", "42")
                    .set_body_json(json!([
                        pair("dev/app/db/host", "a", 7),
                        pair("dev/app/port", "8080", 9),
                    ])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let listing = client(&server).list_under("dev/").await.unwrap();
        assert_eq!(listing.index, ModifyIndex::new(42));
        assert_eq!(listing.entries.len(), 2);
        assert_eq!(listing.entries[0].key, "dev/app/db/host");
        assert_eq!(listing.entries[0].value, b"a");
        assert_eq!(listing.entries[1].modify_index, ModifyIndex::new(9));
    }

    #[tokio::test]
    async fn list_under_missing_prefix_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/nothing/"))
            .respond_with(ResponseTemplate::new(404).insert_header("X-Consul-Index", "3"))
            .mount(&server)
            .await;

        let listing = client(&server).list_under("nothing/").await.unwrap();
        assert!(listing.entries.is_empty());
        assert_eq!(listing.index, ModifyIndex::new(3));
    }

    #[tokio::test]
    async fn null_value_reads_as_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/dev/flag"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "Key": "dev/flag",
                "Value": null,
                "ModifyIndex": 5,
                "Flags": 0,
            }])))
            .mount(&server)
            .await;

        let entry = client(&server).get("dev/flag").await.unwrap().unwrap();
        assert!(entry.value.is_empty());
        assert_eq!(entry.modify_index, ModifyIndex::new(5));
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/dev/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(client(&server).get("dev/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_keys_with_separator() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/dev/"))
            .and(query_param("keys", "true"))
            .and(query_param("separator", "/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(["dev/app/", "dev/top"])))
            .mount(&server)
            .await;

        let keys = client(&server).list_keys("dev/", Some('/')).await.unwrap();
        assert_eq!(keys, vec!["dev/app/".to_string(), "dev/top".to_string()]);
    }

    #[tokio::test]
    async fn datacenter_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/k"))
            .and(query_param("dc", "eu-west"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let conn = Connection {
            datacenter: Some("eu-west".to_string()),
            ..connection(&server)
        };
        let kv = ConsulKv::new(&conn).unwrap();
        assert!(kv.get("k").await.unwrap().is_none());
    }
}

// =============================================================================
// Writes
// =============================================================================

mod writes {
    use super::*;

    #[tokio::test]
    async fn put_sends_body_and_cas() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/kv/dev/app/x"))
            .and(query_param("cas", "12"))
            .and(body_string("hello"))
            .respond_with(ResponseTemplate::new(200).set_body_string("true"))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .put("dev/app/x", b"hello", Some(ModifyIndex::new(12)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn put_cas_false_is_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/kv/dev/app/x"))
            .and(query_param("cas", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("false"))
            .mount(&server)
            .await;

        let err = client(&server)
            .put("dev/app/x", b"v", Some(ModifyIndex::ABSENT))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            KvError::CasMismatch {
                key: "dev/app/x".to_string()
            }
        );
        assert_eq!(err.kind(), ErrorKind::ConcurrentModification);
    }

    #[tokio::test]
    async fn delete_with_cas() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/kv/dev/old"))
            .and(query_param("cas", "4"))
            .respond_with(ResponseTemplate::new(200).set_body_string("true"))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .delete("dev/old", Some(ModifyIndex::new(4)))
            .await
            .unwrap();
    }
}

// =============================================================================
// Failures
// =============================================================================

mod failures {
    use super::*;

    #[tokio::test]
    async fn forbidden_is_permission_denied() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("ACL not found"))
            .mount(&server)
            .await;

        let err = client(&server).get("dev/x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(err.to_string().contains("ACL not found"));
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("No cluster leader"))
            .mount(&server)
            .await;

        let err = client(&server).list_under("dev/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    }

    #[tokio::test]
    async fn slow_agent_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let conn = Connection {
            timeout: Duration::from_millis(200),
            ..connection(&server)
        };
        let err = ConsulKv::new(&conn).unwrap().get("k").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    }

    #[tokio::test]
    async fn connection_refused_is_unavailable() {
        let conn = Connection {
            address: "http://127.0.0.1:1".to_string(),
            ..Connection::default()
        };
        let err = ConsulKv::new(&conn).unwrap().get("k").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    }
}

// =============================================================================
// Snapshot over HTTP
// =============================================================================

#[tokio::test]
async fn snapshot_loads_through_consul() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/dev/"))
        .and(query_param("keys", "true"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!(["dev/", "dev/app/", "dev/top"])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/dev/app/"))
        .and(query_param("recurse", "true"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Consul-Index", "30")
                .set_body_json(json!([
                    pair("dev/app/", "", 2),
                    pair("dev/app/db/host", "a", 20),
                ])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/dev/top"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([pair("dev/top", "1", 11)])))
        .expect(1)
        .mount(&server)
        .await;

    let kv = client(&server);
    let env = Environment::new("dev", KeyPath::parse("dev").unwrap()).with_connection(connection(&server));
    let snapshot = SnapshotLoader::new(&kv).load(&env).await.unwrap();

    let paths: Vec<String> = snapshot.iter().map(|e| e.path.to_string()).collect();
    assert_eq!(paths, vec!["app/db/host", "top"]);
    assert_eq!(snapshot.read_index(), ModifyIndex::new(30));
    assert_eq!(
        snapshot.get(&KeyPath::parse("top").unwrap()).unwrap().value,
        b"1"
    );
}
