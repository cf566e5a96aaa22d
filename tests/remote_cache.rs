// Copyright 2025 Memophor Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;
use std::time::Duration;

use farmaproxy::cache::{CacheBackend, UpstashBackend};
use farmaproxy::metrics::CacheCounters;
use farmaproxy::state::CacheState;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn upstash(server: &MockServer) -> UpstashBackend {
    UpstashBackend::new(&server.uri(), "secret-token").unwrap()
}

#[tokio::test]
async fn upstash_get_sends_prefixed_key_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(header("authorization", "Bearer secret-token"))
        .and(body_json(json!(["GET", "farmaproxy:regions"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "[1,2]"})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = upstash(&server).await;

    assert_eq!(backend.get("regions").await.unwrap(), Some("[1,2]".to_string()));
}

#[tokio::test]
async fn upstash_missing_key_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": null})))
        .mount(&server)
        .await;

    let backend = upstash(&server).await;

    assert_eq!(backend.get("communes:7").await.unwrap(), None);
}

#[tokio::test]
async fn upstash_set_uses_expiry_in_seconds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!(["SET", "farmaproxy:k", "\"v\"", "EX", "60"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "OK"})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = upstash(&server).await;

    backend.set("k", "\"v\"".to_string(), 60).await.unwrap();
}

#[tokio::test]
async fn upstash_error_replies_are_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "WRONGPASS"})))
        .mount(&server)
        .await;

    let backend = upstash(&server).await;

    assert!(backend.get("regions").await.is_err());
    assert!(backend.delete("regions").await.is_err());
}

#[tokio::test]
async fn cache_falls_back_to_upstash_on_local_miss() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!(["GET", "farmaproxy:regions"])))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": "[{\"id\":7,\"nombre\":\"Maule\"}]"})),
        )
        .mount(&server)
        .await;

    let remote: Arc<dyn CacheBackend> = Arc::new(upstash(&server).await);
    let cache: CacheState<serde_json::Value> =
        CacheState::new(Duration::from_secs(60), remote, CacheCounters::detached());

    let value = cache.get("regions").await;

    assert_eq!(value, Some(json!([{"id": 7, "nombre": "Maule"}])));
    assert_eq!(cache.metrics().misses, 1);
    assert_eq!(cache.remote_name(), "upstash");
}

#[tokio::test]
async fn unavailable_upstash_leaves_local_cache_working() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let remote: Arc<dyn CacheBackend> = Arc::new(upstash(&server).await);
    let cache: CacheState<u32> =
        CacheState::new(Duration::from_secs(60), remote, CacheCounters::detached());

    cache.put("k", 42).await;

    assert_eq!(cache.get("k").await, Some(42));
    assert_eq!(cache.get("absent").await, None);
}
