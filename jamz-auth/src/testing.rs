//! Test doubles for driving [`TokenLifecycleManager`](crate::TokenLifecycleManager)
//! without a network or a real clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;

use crate::clock::Clock;
use crate::common::TokenResponse;
use crate::error::AuthError;
use crate::transport::{TokenGrant, TokenTransport};

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Transport that replays queued responses and records every grant it sees.
///
/// While [`ScriptedTransport::hold`] is in effect, requests are recorded but
/// do not complete until [`ScriptedTransport::release`].
/// [`ScriptedTransport::hold_refreshes`] does the same for refresh grants only.
#[derive(Clone)]
pub struct ScriptedTransport {
    inner: Arc<ScriptInner>,
}

struct ScriptInner {
    responses: Mutex<VecDeque<Result<TokenResponse, AuthError>>>,
    requests: Mutex<Vec<TokenGrant>>,
    completed: AtomicUsize,
    gate: watch::Sender<Gate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Open,
    Refreshes,
    All,
}

impl Gate {
    fn blocks(self, grant: &TokenGrant) -> bool {
        match self {
            Gate::Open => false,
            Gate::Refreshes => matches!(grant, TokenGrant::RefreshToken { .. }),
            Gate::All => true,
        }
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScriptInner {
                responses: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
                completed: AtomicUsize::new(0),
                gate: watch::channel(Gate::Open).0,
            }),
        }
    }

    /// Queue a successful token payload
    pub fn push_token(&self, access_token: &str, refresh_token: Option<&str>, expires_in: u64) {
        self.push(Ok(TokenResponse {
            access_token: access_token.to_string(),
            token_type: "Bearer".to_string(),
            expires_in,
            refresh_token: refresh_token.map(str::to_string),
            scope: None,
        }));
    }

    pub fn push_error(&self, error: AuthError) {
        self.push(Err(error));
    }

    pub fn push(&self, response: Result<TokenResponse, AuthError>) {
        self.inner.responses.lock().unwrap().push_back(response);
    }

    pub fn hold(&self) {
        self.inner.gate.send_replace(Gate::All);
    }

    /// Hold refresh requests while letting code exchanges through
    pub fn hold_refreshes(&self) {
        self.inner.gate.send_replace(Gate::Refreshes);
    }

    pub fn release(&self) {
        self.inner.gate.send_replace(Gate::Open);
    }

    /// Requests issued so far, including ones still held
    pub fn request_count(&self) -> usize {
        self.inner.requests.lock().unwrap().len()
    }

    /// Requests that have returned a response
    pub fn completed_count(&self) -> usize {
        self.inner.completed.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TokenGrant> {
        self.inner.requests.lock().unwrap().clone()
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenTransport for ScriptedTransport {
    async fn request_token(&self, grant: TokenGrant) -> Result<TokenResponse, AuthError> {
        self.inner.requests.lock().unwrap().push(grant.clone());

        let mut gate = self.inner.gate.subscribe();
        while gate.borrow_and_update().blocks(&grant) {
            if gate.changed().await.is_err() {
                break;
            }
        }

        let response = self
            .inner
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AuthError::Transport("no scripted response".to_string())));
        self.inner.completed.fetch_add(1, Ordering::SeqCst);
        response
    }
}
