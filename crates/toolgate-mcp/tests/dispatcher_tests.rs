//! Multi-user isolation tests through the dispatcher with real tokens.
//!
//! Each call walks the full path a transport would take: bearer
//! validation, context binding, tool execution. The unit tests in the
//! router module cover rejection ordering and the panic boundary; this
//! file covers what happens when several authenticated users share one
//! server.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use toolgate_mcp::Config;
use toolgate_mcp::auth::types::{AccessToken, AuthorizeRequest, RefreshToken};
use toolgate_mcp::auth::{Datastore, MemoryDatastore, OAuthService, UserManager};
use toolgate_mcp::error::DispatchError;
use toolgate_mcp::router::Dispatcher;
use toolgate_mcp::router::context::ContextRegistry;
use toolgate_mcp::tools::register_all_tools;

const REDIRECT_URI: &str = "http://localhost/cb";
const CODE_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
const PASSWORD: &str = "hunter2hunter2";

struct Harness {
    store: Arc<MemoryDatastore>,
    oauth: Arc<OAuthService>,
    users: UserManager,
    dispatcher: Arc<Dispatcher>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryDatastore::new());
    let as_dyn: Arc<dyn Datastore> = store.clone();
    let oauth = Arc::new(OAuthService::new(Arc::clone(&as_dyn), Config::for_testing()));
    let users = UserManager::new(as_dyn);
    let contexts = Arc::new(ContextRegistry::new(Duration::from_millis(50)));
    let dispatcher = Arc::new(Dispatcher::new(
        register_all_tools(),
        Arc::clone(&oauth),
        users.clone(),
        contexts,
        None,
    ));
    Harness { store, oauth, users, dispatcher }
}

/// Register an account and walk the code flow to an access token.
async fn obtain_token(h: &Harness, username: &str) -> String {
    let user = h.users.register(username, PASSWORD).await.unwrap();
    let client =
        h.oauth.register_client(None, vec![REDIRECT_URI.to_string()]).await.unwrap();

    let request = h
        .oauth
        .begin_authorization(&AuthorizeRequest {
            client_id: Some(client.client_id.clone()),
            redirect_uri: Some(REDIRECT_URI.to_string()),
            response_type: Some("code".to_string()),
            code_challenge: Some(
                URL_SAFE_NO_PAD.encode(Sha256::digest(CODE_VERIFIER.as_bytes())),
            ),
            code_challenge_method: Some("S256".to_string()),
            scope: None,
            state: None,
        })
        .await
        .unwrap();
    let code = h.oauth.grant_code(&request, &user.user_id).await.unwrap();

    h.oauth
        .redeem_code(&code, Some(&client.client_id), Some(REDIRECT_URI), CODE_VERIFIER)
        .await
        .unwrap()
        .access_token
}

async fn call(h: &Harness, token: &str, tool: &str, arguments: Value) -> Value {
    let out = h.dispatcher.dispatch(tool, arguments, Some(token)).await.unwrap();
    serde_json::from_str(&out).unwrap()
}

#[tokio::test]
async fn test_users_have_isolated_key_value_stores() {
    let h = harness();
    let alice = obtain_token(&h, "alice").await;
    let bob = obtain_token(&h, "bob").await;

    call(&h, &alice, "store_set", json!({"key": "color", "value": "blue"})).await;

    // Bob sees nothing of Alice's data.
    let result = call(&h, &bob, "store_get", json!({"key": "color"})).await;
    assert_eq!(result["found"], false);

    let result = call(&h, &bob, "store_keys", json!({})).await;
    assert_eq!(result["count"], 0);

    // Alice's own read still works, and Bob writing the same key does
    // not touch her value.
    call(&h, &bob, "store_set", json!({"key": "color", "value": "red"})).await;
    let result = call(&h, &alice, "store_get", json!({"key": "color"})).await;
    assert_eq!(result["value"], "blue");
}

#[tokio::test]
async fn test_counters_do_not_bleed_between_users() {
    let h = harness();
    let alice = obtain_token(&h, "alice").await;
    let bob = obtain_token(&h, "bob").await;

    let result = call(&h, &alice, "counter", json!({"amount": 5})).await;
    assert_eq!(result["value"], 5);

    let result = call(&h, &bob, "counter", json!({})).await;
    assert_eq!(result["value"], 1);

    let result = call(&h, &alice, "counter", json!({"amount": 2})).await;
    assert_eq!(result["value"], 7);
}

#[tokio::test]
async fn test_context_persists_across_calls() {
    let h = harness();
    let alice = obtain_token(&h, "alice").await;

    let first = call(&h, &alice, "whoami", json!({})).await;
    assert_eq!(first["username"], "alice");
    assert_eq!(first["invocations"], 1);

    let second = call(&h, &alice, "whoami", json!({})).await;
    assert_eq!(second["invocations"], 2);
    assert_eq!(second["user_id"], first["user_id"]);

    assert_eq!(h.dispatcher.contexts().count().await, 1);
}

#[tokio::test]
async fn test_expired_access_token_is_an_auth_failure() {
    let h = harness();
    let user = h.users.register("alice", PASSWORD).await.unwrap();

    h.store
        .insert_token_grant(
            "expired-access".to_string(),
            AccessToken {
                user_id: user.user_id.clone(),
                client_id: "client".to_string(),
                scope: "tools".to_string(),
                created_at: chrono::Utc::now() - chrono::Duration::seconds(3600),
                expires_at: chrono::Utc::now() - chrono::Duration::seconds(60),
            },
            "refresh".to_string(),
            RefreshToken {
                user_id: user.user_id,
                client_id: "client".to_string(),
                scope: "tools".to_string(),
                access_token: "expired-access".to_string(),
                family_id: "fam".to_string(),
                revoked: false,
                created_at: chrono::Utc::now() - chrono::Duration::seconds(3600),
                expires_at: chrono::Utc::now() + chrono::Duration::seconds(3600),
            },
        )
        .await
        .unwrap();

    let err =
        h.dispatcher.dispatch("whoami", json!({}), Some("expired-access")).await.unwrap_err();
    assert!(err.is_auth_failure());
    assert!(!matches!(err, DispatchError::Unavailable(_)));

    // No context was created for the rejected call.
    assert_eq!(h.dispatcher.contexts().count().await, 0);
}

#[tokio::test]
async fn test_idle_context_is_evicted_and_rebuilt_fresh() {
    let h = harness();
    let alice = obtain_token(&h, "alice").await;

    call(&h, &alice, "store_set", json!({"key": "scratch", "value": "data"})).await;
    assert_eq!(h.dispatcher.contexts().count().await, 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(h.dispatcher.contexts().evict_idle().await, 1);
    assert_eq!(h.dispatcher.contexts().count().await, 0);

    // The next call binds a brand-new context; ephemeral state is gone.
    let result = call(&h, &alice, "store_get", json!({"key": "scratch"})).await;
    assert_eq!(result["found"], false);
    assert_eq!(h.dispatcher.contexts().count().await, 1);
}

#[tokio::test]
async fn test_active_context_survives_eviction_sweep() {
    let h = harness();
    let alice = obtain_token(&h, "alice").await;

    call(&h, &alice, "counter", json!({"amount": 3})).await;
    assert_eq!(h.dispatcher.contexts().evict_idle().await, 0);

    let result = call(&h, &alice, "counter", json!({})).await;
    assert_eq!(result["value"], 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_share_one_context() {
    let h = harness();
    let alice = obtain_token(&h, "alice").await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let dispatcher = Arc::clone(&h.dispatcher);
        let token = alice.clone();
        handles.push(tokio::spawn(async move {
            dispatcher.dispatch("counter", json!({"amount": 1}), Some(&token)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.dispatcher.contexts().count().await, 1);
    let result = call(&h, &alice, "counter", json!({"amount": 0})).await;
    assert_eq!(result["value"], 16);
}

#[tokio::test]
async fn test_two_tokens_same_user_share_a_context() {
    let h = harness();
    let alice_one = obtain_token(&h, "alice").await;

    // A second grant for the same account (new client, new code).
    let user = h.users.authenticate("alice", PASSWORD).await.unwrap();
    let client = h.oauth.register_client(None, vec![REDIRECT_URI.to_string()]).await.unwrap();
    let request = h
        .oauth
        .begin_authorization(&AuthorizeRequest {
            client_id: Some(client.client_id.clone()),
            redirect_uri: Some(REDIRECT_URI.to_string()),
            response_type: Some("code".to_string()),
            code_challenge: Some(
                URL_SAFE_NO_PAD.encode(Sha256::digest(CODE_VERIFIER.as_bytes())),
            ),
            code_challenge_method: Some("S256".to_string()),
            scope: None,
            state: None,
        })
        .await
        .unwrap();
    let code = h.oauth.grant_code(&request, &user.user_id).await.unwrap();
    let alice_two = h
        .oauth
        .redeem_code(&code, Some(&client.client_id), Some(REDIRECT_URI), CODE_VERIFIER)
        .await
        .unwrap()
        .access_token;

    // Contexts key on the user, not the token.
    call(&h, &alice_one, "store_set", json!({"key": "shared", "value": "yes"})).await;
    let result = call(&h, &alice_two, "store_get", json!({"key": "shared"})).await;
    assert_eq!(result["found"], true);
    assert_eq!(h.dispatcher.contexts().count().await, 1);
}
