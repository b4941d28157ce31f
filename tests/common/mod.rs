//! Common Test Utilities
//!
//! In-memory repositories and a `TestApp` that drives the real router.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use uuid::Uuid;

use chatter::application::services::AuthServiceImpl;
use chatter::config::{
    BusSettings, ChatSettings, CorsSettings, DatabaseSettings, JwtSettings, RateLimitSettings,
    RedisSettings, ServerSettings, Settings,
};
use chatter::domain::{
    MessageReceipt, MessageRepository, RefreshToken, RefreshTokenRepository, StoredMessage, User,
    UserRepository,
};
use chatter::presentation::middleware::IpRateLimiter;
use chatter::presentation::websocket::{Hub, HubConfig, HubHandle};
use chatter::shared::error::AppError;
use chatter::startup::{build_router, AppState};

#[derive(Default)]
pub struct MemoryUsers(pub Mutex<Vec<User>>);

#[async_trait]
impl UserRepository for MemoryUsers {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.0.lock().iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self.0.lock().iter().find(|u| u.email == email).cloned())
    }

    async fn create(&self, user: &User) -> Result<User, AppError> {
        let mut users = self.0.lock();
        if users
            .iter()
            .any(|u| u.email == user.email || u.username == user.username)
        {
            return Err(AppError::Conflict("Email or username already registered".into()));
        }
        users.push(user.clone());
        Ok(user.clone())
    }
}

#[derive(Default)]
pub struct MemoryTokens(Mutex<HashMap<String, RefreshToken>>);

#[async_trait]
impl RefreshTokenRepository for MemoryTokens {
    async fn create(&self, token: &RefreshToken) -> Result<(), AppError> {
        self.0.lock().insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn revoke(&self, token_hash: &str) -> Result<(), AppError> {
        if let Some(token) = self.0.lock().get_mut(token_hash) {
            token.revoked_at.get_or_insert_with(Utc::now);
        }
        Ok(())
    }

    async fn consume(&self, token_hash: &str) -> Result<Option<RefreshToken>, AppError> {
        let mut tokens = self.0.lock();
        match tokens.get_mut(token_hash) {
            Some(token) if token.is_active() => {
                let consumed = token.clone();
                token.revoked_at = Some(Utc::now());
                Ok(Some(consumed))
            }
            _ => Ok(None),
        }
    }
}

pub struct MemoryMessages {
    users: Arc<MemoryUsers>,
    next_id: AtomicI64,
    rows: Mutex<Vec<(i64, Uuid, String, DateTime<Utc>)>>,
}

impl MemoryMessages {
    pub fn new(users: Arc<MemoryUsers>) -> Self {
        Self {
            users,
            next_id: AtomicI64::new(1),
            rows: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MessageRepository for MemoryMessages {
    async fn create(
        &self,
        user_id: Uuid,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<MessageReceipt, AppError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.rows
            .lock()
            .push((id, user_id, content.to_string(), created_at));
        Ok(MessageReceipt { id, created_at })
    }

    async fn list_recent(
        &self,
        limit: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StoredMessage>, AppError> {
        let users = self.users.0.lock();
        let rows = self.rows.lock();
        let mut recent: Vec<StoredMessage> = rows
            .iter()
            .rev()
            .filter(|(_, _, _, at)| since.map_or(true, |since| *at > since))
            .take(limit as usize)
            .map(|(id, user_id, content, created_at)| StoredMessage {
                id: *id,
                user_id: *user_id,
                username: users
                    .iter()
                    .find(|u| u.id == *user_id)
                    .map(|u| u.username.clone())
                    .unwrap_or_default(),
                content: content.clone(),
                created_at: *created_at,
            })
            .collect();
        recent.reverse();
        Ok(recent)
    }
}

pub fn test_settings() -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
            shutdown_grace_secs: 1,
        },
        database: DatabaseSettings {
            url: "postgres://unused".into(),
            max_connections: 1,
            min_connections: 0,
            acquire_timeout: 1,
            run_migrations: false,
        },
        redis: RedisSettings {
            url: "redis://unused".into(),
        },
        jwt: JwtSettings {
            secret: "integration-test-secret-at-least-32-bytes".into(),
            issuer: "chatter".into(),
            access_token_expiry_minutes: 5,
            refresh_token_expiry_days: 7,
            secure_cookies: false,
        },
        rate_limit: RateLimitSettings {
            ip_requests: 20,
            ip_window_secs: 60,
            ip_ttl_secs: 180,
            ip_sweep_interval_secs: 60,
            trust_forwarded_for: true,
        },
        chat: ChatSettings::default(),
        bus: BusSettings {
            enabled: false,
            stream: "MESSAGES".into(),
            subject: "MESSAGES.room.global".into(),
            consumer_group: "chat_consumer".into(),
            max_deliver: 3,
            ack_wait_secs: 30,
            poll_interval_ms: 250,
            dedup_ttl_secs: 120,
        },
        cors: CorsSettings {
            allowed_origins: Vec::new(),
        },
        environment: "test".into(),
    }
}

/// Test application backed by in-memory repositories
pub struct TestApp {
    pub router: Router,
    pub users: Arc<MemoryUsers>,
    pub messages: Arc<MemoryMessages>,
    pub hub: HubHandle,
    pub shutdown: CancellationToken,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_settings(test_settings()).await
    }

    pub async fn with_settings(settings: Settings) -> Self {
        let settings = Arc::new(settings);
        let users = Arc::new(MemoryUsers::default());
        let tokens = Arc::new(MemoryTokens::default());
        let messages = Arc::new(MemoryMessages::new(users.clone()));
        let shutdown = CancellationToken::new();

        let (hub, hub_handle) = Hub::new(
            HubConfig {
                instance_id: Uuid::new_v4(),
                subject: settings.bus.subject.clone(),
                inbound_capacity: settings.chat.inbound_capacity,
            },
            messages.clone(),
            None,
            TaskTracker::new(),
        );
        tokio::spawn(hub.run(None, shutdown.clone()));

        let state = AppState {
            settings: settings.clone(),
            auth: Arc::new(AuthServiceImpl::new(
                users.clone(),
                tokens,
                settings.jwt.clone(),
            )),
            messages: messages.clone(),
            hub: hub_handle.clone(),
            ip_limiter: Arc::new(IpRateLimiter::new(&settings.rate_limit)),
            shutdown: shutdown.clone(),
        };

        Self {
            router: build_router(state),
            users,
            messages,
            hub: hub_handle,
            shutdown,
        }
    }

    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request(
            Request::builder()
                .uri(uri)
                .header("X-Forwarded-For", "203.0.113.7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// GET with session cookies
    pub async fn get_with_cookies(&self, uri: &str, cookies: &str) -> Response<Body> {
        self.request(
            Request::builder()
                .uri(uri)
                .header("X-Forwarded-For", "203.0.113.7")
                .header(header::COOKIE, cookies)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// POST a url-encoded form
    pub async fn post_form(&self, uri: &str, form: &str) -> Response<Body> {
        self.post_form_with(uri, form, &[]).await
    }

    pub async fn post_form_with(
        &self,
        uri: &str,
        form: &str,
        headers: &[(&str, &str)],
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if !headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("x-forwarded-for"))
        {
            builder = builder.header("X-Forwarded-For", "203.0.113.7");
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.request(builder.body(Body::from(form.to_string())).unwrap())
            .await
    }

    /// Sign up and log in, returning the `Cookie` header value for the session.
    pub async fn logged_in(&self, username: &str) -> String {
        let email = format!("{username}@example.com");
        let signup = format!(
            "username={username}&email={email}&password={TEST_PASSWORD}&confirm_password={TEST_PASSWORD}"
        );
        self.post_form("/account/signup", &signup).await;

        let login = self
            .post_form(
                "/account/login",
                &format!("email={email}&password={TEST_PASSWORD}"),
            )
            .await;
        cookie_header(&login)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub const TEST_PASSWORD: &str = "TestPassword123";

/// Values of every `Set-Cookie` header.
pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_owned())
        .collect()
}

/// Fold `Set-Cookie` headers into a `Cookie` request header.
pub fn cookie_header(response: &Response<Body>) -> String {
    set_cookies(response)
        .iter()
        .filter_map(|c| c.split(';').next())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Value of a named cookie in a `Set-Cookie` list.
pub fn cookie_value(response: &Response<Body>, name: &str) -> Option<String> {
    set_cookies(response).iter().find_map(|c| {
        c.split(';')
            .next()
            .and_then(|pair| pair.strip_prefix(&format!("{name}=")))
            .map(str::to_owned)
    })
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
