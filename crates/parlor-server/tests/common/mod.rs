#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, StatusCode, header},
};
use tower::ServiceExt;

use parlor_api::auth::AppState;
use parlor_auth::mailer::RecordingMailer;
use parlor_db::{AccountStore, Database};
use parlor_server::config::Config;
use parlor_server::{build_router, build_state};

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub mailer: Arc<RecordingMailer>,
    next_client: AtomicU8,
}

pub fn test_config() -> Config {
    let env: HashMap<&str, &str> = [
        ("PARLOR_SECRET_KEY", "integration-test-secret"),
        ("PARLOR_PUBLIC_URL", "http://parlor.test"),
        ("PARLOR_TRUST_PROXY", "true"),
    ]
    .into_iter()
    .collect();
    Config::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap()
}

impl TestApp {
    pub fn new() -> Self {
        let store: Arc<dyn AccountStore> = Arc::new(Database::open_in_memory().unwrap());
        let mailer = Arc::new(RecordingMailer::new());
        let state = build_state(&test_config(), store, mailer.clone());
        Self {
            router: build_router(state.clone()),
            state,
            mailer,
            next_client: AtomicU8::new(1),
        }
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.unwrap()
    }

    pub async fn login(&self, email: &str, client: &str) -> Response<Body> {
        let req = Request::post("/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header("x-forwarded-for", client)
            .body(Body::from(format!("email={}", email.replace('@', "%40"))))
            .unwrap();
        self.send(req).await
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut req = Request::get(uri);
        if let Some(cookie) = cookie {
            req = req.header(header::COOKIE, cookie);
        }
        self.send(req.body(Body::empty()).unwrap()).await
    }

    pub async fn post_handle(&self, handle: &str, cookie: Option<&str>) -> Response<Body> {
        let mut req = Request::post("/set_handle")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            req = req.header(header::COOKIE, cookie);
        }
        let body = serde_json::json!({ "handle": handle }).to_string();
        self.send(req.body(Body::from(body)).unwrap()).await
    }

    /// Log in and follow the magic link. Returns the `name=value` session cookie.
    pub async fn sign_in(&self, email: &str) -> String {
        // Fresh address per sign-in so setup never trips the login budget.
        let client = format!("192.0.2.{}", self.next_client.fetch_add(1, Ordering::Relaxed));
        let resp = self.login(email, &client).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let token = self.mailer.last_token().unwrap();

        let resp = self.get(&format!("/verify/{token}"), None).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        session_cookie(&resp).unwrap()
    }

    /// Sign in and claim `handle`.
    pub async fn member(&self, email: &str, handle: &str) -> String {
        let cookie = self.sign_in(email).await;
        let resp = self.post_handle(handle, Some(&cookie)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        cookie
    }
}

pub fn session_cookie(resp: &Response<Body>) -> Option<String> {
    resp.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("parlor_session="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

pub fn location(resp: &Response<Body>) -> Option<&str> {
    resp.headers().get(header::LOCATION)?.to_str().ok()
}

pub async fn json_body(resp: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn text_body(resp: Response<Body>) -> String {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
