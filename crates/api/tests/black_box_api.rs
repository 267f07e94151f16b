use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, routing::get};
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use reqwest::header::{COOKIE, SET_COOKIE};

use crewdesk_api::app::{self, AppServices};
use crewdesk_api::app::services::{SharedPermissionStore, SharedUserStore, build_verifier};
use crewdesk_api::config::{AuthConfig, RateLimitSettings};
use crewdesk_auth::testutil::{
    TEST_CLIENT_ID, TEST_ISSUER, TestSigner, access_token_claims, id_token_claims,
    tamper_signature, user,
};
use crewdesk_auth::{AuthMode, Authenticator, PermissionResolver, PrincipalResolver, Role, UserRecord};
use crewdesk_infra::{InMemoryGrantStore, InMemoryUserStore};

struct TestServer {
    base_url: String,
    users: Arc<InMemoryUserStore>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// App wired to a real key endpoint serving `signer`'s public key.
    async fn spawn(signer: &TestSigner, users: Vec<UserRecord>) -> Self {
        let keys = TestSigner::jwk_set(&[signer]);
        let jwks = Router::new().route(
            "/.well-known/jwks.json",
            get(move || {
                let keys = keys.clone();
                async move { Json(keys) }
            }),
        );
        let (jwks_addr, jwks_handle) = serve(jwks).await;

        let mut server =
            Self::spawn_with_jwks(format!("http://{jwks_addr}/.well-known/jwks.json"), users).await;
        server.handles.push(jwks_handle);
        server
    }

    async fn spawn_with_jwks(jwks_url: String, users: Vec<UserRecord>) -> Self {
        let auth = AuthConfig {
            issuer: TEST_ISSUER.to_string(),
            client_id: TEST_CLIENT_ID.to_string(),
            jwks_url: Some(jwks_url),
            key_fetch_timeout_secs: 2,
            ..AuthConfig::default()
        };
        let verifier = build_verifier(&auth).expect("verifier");

        let users = Arc::new(InMemoryUserStore::with_users(users));
        let user_store: SharedUserStore = users.clone();
        let grants: SharedPermissionStore = Arc::new(InMemoryGrantStore::with_defaults());

        let services = AppServices::new(
            Authenticator::new(AuthMode::Verify(verifier), PrincipalResolver::new(user_store)),
            PermissionResolver::new(grants),
            RateLimitSettings::default(),
            false,
        );

        // Build app (same router as prod), but bind to an ephemeral port.
        let (addr, handle) = serve(app::build_app(Arc::new(services))).await;
        Self {
            base_url: format!("http://{addr}/api/v1"),
            users,
            handles: vec![handle],
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn serve(app: Router) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    (addr, handle)
}

fn in_one_hour() -> chrono::DateTime<Utc> {
    Utc::now() + ChronoDuration::hours(1)
}

async fn error_code(res: reqwest::Response) -> String {
    let body: serde_json::Value = res.json().await.unwrap();
    body["error"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn bearer_token_authenticates() {
    let signer = TestSigner::generate("kid-1");
    let alice = user("alice@example.com", Some("sub-alice"), Role::Engineer);
    let server = TestServer::spawn(&signer, vec![alice.clone()]).await;

    let token = signer.sign(&id_token_claims("sub-alice", Some("alice@example.com"), in_one_hour()));
    let res = reqwest::Client::new()
        .get(server.url("/auth/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["user_id"], alice.id.to_string());
    assert_eq!(body["role"], "engineer");
    assert_eq!(body["token_use"], "id");
    assert_eq!(body["token_origin"], "authorization_header");
    assert_eq!(body["bypass"], false);
}

#[tokio::test]
async fn access_tokens_are_accepted() {
    let signer = TestSigner::generate("kid-1");
    let bob = user("bob@example.com", Some("sub-bob"), Role::Manager);
    let server = TestServer::spawn(&signer, vec![bob]).await;

    let token = signer.sign(&access_token_claims("sub-bob", in_one_hour()));
    let res = reqwest::Client::new()
        .get(server.url("/auth/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["token_use"], "access");
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let signer = TestSigner::generate("kid-1");
    let server = TestServer::spawn(&signer, vec![]).await;

    let res = reqwest::get(server.url("/auth/me")).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "unauthenticated");
}

#[tokio::test]
async fn expired_token_reports_expiry_only() {
    let signer = TestSigner::generate("kid-1");
    let alice = user("alice@example.com", Some("sub-alice"), Role::Engineer);
    let server = TestServer::spawn(&signer, vec![alice]).await;

    let expired = Utc::now() - ChronoDuration::minutes(5);
    let token = signer.sign(&id_token_claims("sub-alice", None, expired));
    let res = reqwest::Client::new()
        .get(server.url("/auth/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "token_expired");
    assert!(!body.to_string().contains("sub-alice"));
}

#[tokio::test]
async fn tampered_token_is_rejected() {
    let signer = TestSigner::generate("kid-1");
    let alice = user("alice@example.com", Some("sub-alice"), Role::Engineer);
    let server = TestServer::spawn(&signer, vec![alice]).await;

    let token = signer.sign(&id_token_claims("sub-alice", None, in_one_hour()));
    let res = reqwest::Client::new()
        .get(server.url("/auth/me"))
        .bearer_auth(tamper_signature(&token))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "unauthenticated");
}

#[tokio::test]
async fn cookie_and_query_tokens_are_accepted() {
    let signer = TestSigner::generate("kid-1");
    let alice = user("alice@example.com", Some("sub-alice"), Role::Engineer);
    let server = TestServer::spawn(&signer, vec![alice]).await;
    let token = signer.sign(&id_token_claims("sub-alice", None, in_one_hour()));
    let client = reqwest::Client::new();

    let res = client
        .get(server.url("/auth/me"))
        .header(COOKIE, format!("theme=dark; access_token={token}"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["token_origin"], "cookie");

    let res = client
        .get(format!("{}?token={token}", server.url("/auth/me")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["token_origin"], "query_parameter");
}

#[tokio::test]
async fn session_exchanges_bearer_for_cookie() {
    let signer = TestSigner::generate("kid-1");
    let alice = user("alice@example.com", Some("sub-alice"), Role::Engineer);
    let server = TestServer::spawn(&signer, vec![alice]).await;
    let token = signer.sign(&id_token_claims("sub-alice", None, in_one_hour()));
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/auth/session"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cookie = res.headers()[SET_COOKIE].to_str().unwrap().to_string();
    assert!(cookie.starts_with(&format!("access_token={token};")));
    assert!(cookie.contains("HttpOnly"));

    let session = cookie.split(';').next().unwrap().to_string();
    let res = client
        .get(server.url("/auth/me"))
        .header(COOKIE, session)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(server.url("/auth/logout"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert!(res.headers()[SET_COOKIE].to_str().unwrap().contains("Max-Age=0"));
}

#[tokio::test]
async fn login_attempts_are_throttled_per_origin() {
    let signer = TestSigner::generate("kid-1");
    let server = TestServer::spawn(&signer, vec![]).await;
    let client = reqwest::Client::new();

    for _ in 0..10 {
        let res = client.post(server.url("/auth/session")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
    let res = client.post(server.url("/auth/session")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.headers()["x-ratelimit-limit"], "10");
    assert_eq!(res.headers()["x-ratelimit-remaining"], "0");
    assert!(res.headers().contains_key("retry-after"));
    assert_eq!(error_code(res).await, "rate_limited");
}

#[tokio::test]
async fn unknown_and_disabled_accounts_are_rejected() {
    let signer = TestSigner::generate("kid-1");
    let mut carol = user("carol@example.com", Some("sub-carol"), Role::Manager);
    carol.active = false;
    let server = TestServer::spawn(&signer, vec![carol]).await;
    let client = reqwest::Client::new();

    for sub in ["sub-nobody", "sub-carol"] {
        let token = signer.sign(&id_token_claims(sub, None, in_one_hour()));
        let res = client
            .get(server.url("/auth/me"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{sub}");
    }
}

#[tokio::test]
async fn email_fallback_rebinds_the_subject() {
    let signer = TestSigner::generate("kid-1");
    let dave = user("dave@example.com", None, Role::Engineer);
    let server = TestServer::spawn(&signer, vec![dave.clone()]).await;

    let token = signer.sign(&id_token_claims("sub-dave-new", Some("DAVE@example.com"), in_one_hour()));
    let res = reqwest::Client::new()
        .get(server.url("/auth/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        server.users.get(dave.id).unwrap().external_subject.as_deref(),
        Some("sub-dave-new")
    );
}

#[tokio::test]
async fn permission_checks_use_the_grant_table() {
    let signer = TestSigner::generate("kid-1");
    let erin = user("erin@example.com", Some("sub-erin"), Role::Engineer);
    let server = TestServer::spawn(&signer, vec![erin]).await;
    let token = signer.sign(&id_token_claims("sub-erin", None, in_one_hour()));
    let client = reqwest::Client::new();

    // weekly_report:write is granted, so read follows.
    let res = client
        .get(server.url("/authz/check?permission=weekly_report:read"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["scope"], "owned");

    let res = client
        .get(server.url("/authz/check?permission=billing:read"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "forbidden");

    let res = client
        .post(server.url("/notifications/reminders"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unreachable_key_endpoint_fails_closed() {
    let signer = TestSigner::generate("kid-1");
    let alice = user("alice@example.com", Some("sub-alice"), Role::Engineer);

    // Bind and drop to get a port nothing listens on.
    let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let server =
        TestServer::spawn_with_jwks(format!("http://{dead_addr}/.well-known/jwks.json"), vec![alice]).await;
    let token = signer.sign(&id_token_claims("sub-alice", None, in_one_hour()));
    let res = reqwest::Client::new()
        .get(server.url("/auth/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_code(res).await, "auth_unavailable");
}
