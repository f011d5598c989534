//! Token lifecycle: code exchange, expiry detection, single-flight refresh and
//! credential supply.
//!
//! All bookkeeping (store handle, in-flight flag, waiter queue, sign-out epoch)
//! sits behind one mutex that is never held across an `.await`, so "inspect
//! state, maybe start a refresh, enqueue" happens atomically. The refresh
//! request itself runs in a spawned task; when it settles, the task persists
//! the result and takes the queue in a single critical section, then notifies
//! waiters in the order they arrived. A successful code exchange or a
//! sign-out bumps an epoch, so a refresh that started earlier cannot write
//! back over the newer state.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::common::{Credential, TokenResponse};
use crate::error::AuthError;
use crate::store::CredentialStore;
use crate::transport::{TokenGrant, TokenTransport};

/// Observable state of the current credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// Safe to use immediately
    Fresh,
    /// Expired or inside the expiry buffer, with a refresh token available
    StaleRefreshable,
    /// Nothing stored, or expired with no way to renew
    Absent,
}

/// Result delivered to every waiter of one refresh cycle
type Outcome = Result<String, String>;

enum Waiter {
    Task(oneshot::Sender<Outcome>),
    Callback(Box<dyn FnOnce(String) + Send>),
}

impl Waiter {
    fn notify(self, outcome: &Outcome) {
        match self {
            Waiter::Task(tx) => {
                // receiver gone means the caller stopped waiting
                let _ = tx.send(outcome.clone());
            }
            Waiter::Callback(on_ready) => {
                if let Ok(token) = outcome {
                    on_ready(token.clone());
                }
            }
        }
    }
}

enum Lookup {
    Fresh(String),
    Stale { refresh_token: Option<String> },
    Missing,
}

enum Ticket {
    Ready(String),
    Pending(oneshot::Receiver<Outcome>),
}

struct RefreshState<S> {
    store: S,
    refreshing: bool,
    waiters: Vec<Waiter>,
    /// Bumped by sign-out and code exchange so a refresh that started before
    /// either cannot write back
    epoch: u64,
}

struct Shared<S, T, C> {
    transport: T,
    clock: C,
    /// Runtime the manager was built on, used when a caller has none
    runtime: Option<Handle>,
    state: Mutex<RefreshState<S>>,
}

impl<S, T, C> Shared<S, T, C>
where
    S: CredentialStore,
    T: TokenTransport,
    C: Clock,
{
    fn lock(&self) -> MutexGuard<'_, RefreshState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn<F>(&self, task: F) -> Option<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match Handle::try_current().ok().or_else(|| self.runtime.clone()) {
            Some(runtime) => Some(runtime.spawn(task)),
            None => {
                tracing::warn!("No tokio runtime available to run token request");
                None
            }
        }
    }

    fn stored(&self, state: &RefreshState<S>) -> Option<Credential> {
        match state.store.get() {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stored credential");
                None
            }
        }
    }

    fn lookup(&self, state: &RefreshState<S>) -> Lookup {
        match self.stored(state) {
            Some(credential) if credential.is_fresh(self.clock.now()) => {
                Lookup::Fresh(credential.access_token)
            }
            Some(credential) => Lookup::Stale {
                refresh_token: credential.refresh_token().map(str::to_string),
            },
            None => Lookup::Missing,
        }
    }

    /// Persist a refresh result, keeping the stored refresh token when the
    /// response carries none
    fn merge_refresh(
        &self,
        state: &mut RefreshState<S>,
        result: Result<TokenResponse, AuthError>,
        received_at: DateTime<Utc>,
    ) -> Result<Credential, AuthError> {
        let response = result?;
        let previous = self.stored(state);
        let credential = Credential::from_response(response, received_at, previous.as_ref())?;
        state.store.put(&credential)?;
        Ok(credential)
    }

    async fn run_refresh(self: Arc<Self>, refresh_token: String, epoch: u64) {
        let result = self
            .transport
            .request_token(TokenGrant::RefreshToken { refresh_token })
            .await;
        let received_at = self.clock.now();

        let (waiters, outcome) = {
            let mut state = self.lock();
            if state.epoch != epoch {
                tracing::debug!("Discarding refresh result superseded by sign-out or exchange");
                return;
            }

            let outcome = match self.merge_refresh(&mut state, result, received_at) {
                Ok(credential) => {
                    tracing::info!(
                        expires_at = %credential.expires_at,
                        pending = state.waiters.len(),
                        "Access token refreshed"
                    );
                    Ok(credential.access_token)
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        pending = state.waiters.len(),
                        "Access token refresh failed"
                    );
                    Err(e.to_string())
                }
            };

            state.refreshing = false;
            (std::mem::take(&mut state.waiters), outcome)
        };

        for waiter in waiters {
            waiter.notify(&outcome);
        }
    }
}

/// Obtains, caches, refreshes and serves the bearer credential.
///
/// Cheap to clone; clones share the same state. Refreshes are spawned on the
/// caller's tokio runtime, falling back to the one the manager was built on.
/// With neither available a refresh cannot start and waiting callers are
/// failed instead.
pub struct TokenLifecycleManager<S, T, C = SystemClock> {
    shared: Arc<Shared<S, T, C>>,
}

impl<S, T, C> Clone for TokenLifecycleManager<S, T, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S, T> TokenLifecycleManager<S, T, SystemClock>
where
    S: CredentialStore,
    T: TokenTransport,
{
    pub fn new(store: S, transport: T) -> Self {
        Self::with_clock(store, transport, SystemClock)
    }
}

impl<S, T, C> TokenLifecycleManager<S, T, C>
where
    S: CredentialStore,
    T: TokenTransport,
    C: Clock,
{
    pub fn with_clock(store: S, transport: T, clock: C) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                clock,
                runtime: Handle::try_current().ok(),
                state: Mutex::new(RefreshState {
                    store,
                    refreshing: false,
                    waiters: Vec::new(),
                    epoch: 0,
                }),
            }),
        }
    }

    /// Trade a one-time authorization code for a credential and store it.
    ///
    /// On any failure the previously stored credential is left untouched. On
    /// success a refresh still in flight is superseded: its result is
    /// discarded and its queued callers receive the exchanged token.
    pub async fn exchange_authorization_code(&self, code: &str) -> Result<(), AuthError> {
        let response = self
            .shared
            .transport
            .request_token(TokenGrant::AuthorizationCode {
                code: code.to_string(),
            })
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "Authorization code exchange failed"))?;
        let received_at = self.shared.clock.now();

        let (waiters, outcome) = {
            let mut state = self.shared.lock();
            let previous = self.shared.stored(&state);
            let credential =
                Credential::from_response(response, received_at, previous.as_ref())?;
            state.store.put(&credential)?;

            state.epoch += 1;
            state.refreshing = false;
            tracing::info!(
                expires_at = %credential.expires_at,
                superseded = state.waiters.len(),
                "Authorization code exchanged"
            );
            (
                std::mem::take(&mut state.waiters),
                Ok(credential.access_token),
            )
        };

        for waiter in waiters {
            waiter.notify(&outcome);
        }
        Ok(())
    }

    /// Callback form of [`Self::exchange_authorization_code`].
    ///
    /// Without a runtime to run on, `on_done(false)` is called immediately and
    /// `None` is returned.
    pub fn exchange_authorization_code_with<F>(
        &self,
        code: String,
        on_done: F,
    ) -> Option<JoinHandle<()>>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let manager = self.clone();
        let (tx, rx) = oneshot::channel::<F>();
        let handle = self.shared.spawn(async move {
            if let Ok(on_done) = rx.await {
                on_done(manager.exchange_authorization_code(&code).await.is_ok());
            }
        });
        Self::dispatch(handle, tx, on_done)
    }

    /// Hand `on_ready` a usable access token.
    ///
    /// A fresh token is delivered immediately on the calling thread. A stale
    /// one queues `on_ready` behind the single in-flight refresh, starting it if
    /// needed; queued callbacks run in arrival order once the refresh lands.
    /// A refresh cycle closes when its result is persisted under the lock, not
    /// when the response arrives: a caller queued before that point joins the
    /// cycle, one arriving after it sees the new credential.
    /// When no credential can be produced (absent, unrenewable, failed refresh,
    /// no runtime to refresh on, or sign-out while queued) `on_ready` is dropped
    /// without being called.
    pub fn with_valid_credential<F>(&self, on_ready: F)
    where
        F: FnOnce(String) + Send + 'static,
    {
        let mut state = self.shared.lock();
        match self.shared.lookup(&state) {
            Lookup::Fresh(token) => {
                drop(state);
                on_ready(token);
            }
            Lookup::Stale {
                refresh_token: Some(refresh_token),
            } => {
                self.enqueue(&mut state, Waiter::Callback(Box::new(on_ready)), refresh_token);
            }
            Lookup::Stale {
                refresh_token: None,
            }
            | Lookup::Missing => {
                tracing::debug!("No usable credential, caller must re-authenticate");
            }
        }
    }

    /// Awaitable counterpart of [`Self::with_valid_credential`]
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let ticket = match self.acquire() {
            Err(AuthError::NoRefreshToken) => return Err(AuthError::NotAuthenticated),
            other => other?,
        };
        Self::redeem(ticket).await
    }

    /// Make sure the stored credential is fresh, joining any refresh already
    /// in flight rather than starting a second one.
    ///
    /// Returns `true` if the credential is fresh on return.
    pub async fn refresh_if_needed(&self) -> bool {
        match self.acquire() {
            Ok(ticket) => Self::redeem(ticket).await.is_ok(),
            Err(e) => {
                tracing::debug!(error = %e, "Refresh not possible");
                false
            }
        }
    }

    /// Callback form of [`Self::refresh_if_needed`].
    ///
    /// Without a runtime to run on, `on_done(false)` is called immediately and
    /// `None` is returned.
    pub fn refresh_if_needed_with<F>(&self, on_done: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let manager = self.clone();
        let (tx, rx) = oneshot::channel::<F>();
        let handle = self.shared.spawn(async move {
            if let Ok(on_done) = rx.await {
                on_done(manager.refresh_if_needed().await);
            }
        });
        Self::dispatch(handle, tx, on_done)
    }

    /// Hand `on_done` to the spawned task, or fail it on the spot if nothing
    /// was spawned
    fn dispatch<F>(
        handle: Option<JoinHandle<()>>,
        tx: oneshot::Sender<F>,
        on_done: F,
    ) -> Option<JoinHandle<()>>
    where
        F: FnOnce(bool),
    {
        match handle {
            Some(handle) => {
                if let Err(on_done) = tx.send(on_done) {
                    on_done(false);
                }
                Some(handle)
            }
            None => {
                on_done(false);
                None
            }
        }
    }

    /// Remove every stored field and release anyone waiting on a refresh
    /// with no token.
    pub fn sign_out(&self) -> Result<(), AuthError> {
        let (drained, result) = {
            let mut state = self.shared.lock();
            state.epoch += 1;
            state.refreshing = false;
            let drained = std::mem::take(&mut state.waiters);
            (drained, state.store.clear())
        };

        tracing::info!(dropped = drained.len(), "Signed out");
        // dropping the senders resolves every pending receiver
        drop(drained);
        result
    }

    pub fn is_signed_in(&self) -> bool {
        let state = self.shared.lock();
        self.shared
            .stored(&state)
            .is_some_and(|credential| !credential.access_token.is_empty())
    }

    pub fn credential_state(&self) -> CredentialState {
        let state = self.shared.lock();
        match self.shared.lookup(&state) {
            Lookup::Fresh(_) => CredentialState::Fresh,
            Lookup::Stale {
                refresh_token: Some(_),
            } => CredentialState::StaleRefreshable,
            Lookup::Stale {
                refresh_token: None,
            }
            | Lookup::Missing => CredentialState::Absent,
        }
    }

    /// Snapshot of the stored credential
    pub fn credential(&self) -> Option<Credential> {
        let state = self.shared.lock();
        self.shared.stored(&state)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.credential().map(|credential| credential.expires_at)
    }

    pub fn is_refreshing(&self) -> bool {
        self.shared.lock().refreshing
    }

    /// Callers queued behind the in-flight refresh
    pub fn pending_callers(&self) -> usize {
        self.shared.lock().waiters.len()
    }

    fn acquire(&self) -> Result<Ticket, AuthError> {
        let mut state = self.shared.lock();
        match self.shared.lookup(&state) {
            Lookup::Fresh(token) => Ok(Ticket::Ready(token)),
            Lookup::Stale {
                refresh_token: Some(refresh_token),
            } => {
                let (tx, rx) = oneshot::channel();
                self.enqueue(&mut state, Waiter::Task(tx), refresh_token);
                Ok(Ticket::Pending(rx))
            }
            Lookup::Stale {
                refresh_token: None,
            } => Err(AuthError::NoRefreshToken),
            Lookup::Missing => Err(AuthError::NotAuthenticated),
        }
    }

    async fn redeem(ticket: Ticket) -> Result<String, AuthError> {
        match ticket {
            Ticket::Ready(token) => Ok(token),
            Ticket::Pending(rx) => match rx.await {
                Ok(Ok(token)) => Ok(token),
                Ok(Err(reason)) => Err(AuthError::RefreshFailed(reason)),
                // queue drained by sign-out
                Err(_) => Err(AuthError::NotAuthenticated),
            },
        }
    }

    fn enqueue(&self, state: &mut RefreshState<S>, waiter: Waiter, refresh_token: String) {
        state.waiters.push(waiter);

        if state.refreshing {
            tracing::debug!(pending = state.waiters.len(), "Refresh in flight, caller queued");
            return;
        }

        tracing::debug!("Credential stale, starting refresh");
        let task = Arc::clone(&self.shared).run_refresh(refresh_token, state.epoch);
        if self.shared.spawn(task).is_some() {
            state.refreshing = true;
            return;
        }

        // nothing in flight, so the queue holds only this caller
        if let Some(waiter) = state.waiters.pop() {
            waiter.notify(&Err("no tokio runtime to run the refresh on".to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCredentialStore;
    use crate::testing::{ManualClock, ScriptedTransport};
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn manager_with(
        credential: Option<Credential>,
    ) -> TokenLifecycleManager<MemoryCredentialStore, ScriptedTransport, ManualClock> {
        let store = credential
            .map(MemoryCredentialStore::with_credential)
            .unwrap_or_default();
        TokenLifecycleManager::with_clock(
            store,
            ScriptedTransport::new(),
            ManualClock::new(start()),
        )
    }

    fn credential(expires_in: Duration, refresh_token: Option<&str>) -> Credential {
        Credential {
            access_token: "access".to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at: start() + expires_in,
        }
    }

    #[test]
    fn state_is_absent_without_credential() {
        let manager = manager_with(None);
        assert_eq!(manager.credential_state(), CredentialState::Absent);
        assert!(!manager.is_signed_in());
    }

    #[test]
    fn state_is_fresh_outside_the_buffer() {
        let manager = manager_with(Some(credential(Duration::minutes(6), Some("r"))));
        assert_eq!(manager.credential_state(), CredentialState::Fresh);
    }

    #[test]
    fn state_is_stale_inside_the_buffer() {
        let manager = manager_with(Some(credential(Duration::minutes(5), Some("r"))));
        assert_eq!(manager.credential_state(), CredentialState::StaleRefreshable);
    }

    #[test]
    fn expired_without_refresh_token_is_absent_but_signed_in() {
        let manager = manager_with(Some(credential(Duration::minutes(-1), None)));
        assert_eq!(manager.credential_state(), CredentialState::Absent);
        assert!(manager.is_signed_in());
    }

    #[test]
    fn fresh_callback_runs_on_the_calling_thread() {
        let manager = manager_with(Some(credential(Duration::hours(1), Some("r"))));
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        manager.with_valid_credential(move |token| *sink.lock().unwrap() = Some(token));
        assert_eq!(seen.lock().unwrap().as_deref(), Some("access"));
    }

    #[test]
    fn stale_callback_without_runtime_is_dropped() {
        let manager = manager_with(Some(credential(Duration::minutes(-1), Some("r"))));

        let invoked = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&invoked);
        manager.with_valid_credential(move |_| *flag.lock().unwrap() = true);

        assert!(!*invoked.lock().unwrap());
        assert!(!manager.is_refreshing());
        assert_eq!(manager.pending_callers(), 0);
    }

    #[test]
    fn callback_forms_without_runtime_report_failure() {
        let manager = manager_with(Some(credential(Duration::minutes(-1), Some("r"))));

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        let handle = manager.refresh_if_needed_with(move |ok| sink.lock().unwrap().push(ok));
        assert!(handle.is_none());

        let sink = Arc::clone(&outcomes);
        let handle = manager
            .exchange_authorization_code_with("code".to_string(), move |ok| {
                sink.lock().unwrap().push(ok)
            });
        assert!(handle.is_none());

        assert_eq!(*outcomes.lock().unwrap(), vec![false, false]);
    }

    #[test]
    fn refresh_runs_on_construction_runtime_when_caller_has_none() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let transport = ScriptedTransport::new();
        transport.push_token("new-token", None, 3600);
        let manager = {
            let _guard = runtime.enter();
            TokenLifecycleManager::with_clock(
                MemoryCredentialStore::with_credential(credential(
                    Duration::minutes(-1),
                    Some("r"),
                )),
                transport.clone(),
                ManualClock::new(start()),
            )
        };

        let (tx, rx) = std::sync::mpsc::channel();
        manager.with_valid_credential(move |token| tx.send(token).unwrap());

        let token = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(token, "new-token");
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn missing_refresh_token_reports_failure() {
        let manager = manager_with(Some(credential(Duration::minutes(-1), None)));
        assert!(!manager.refresh_if_needed().await);
        assert!(matches!(
            manager.access_token().await,
            Err(AuthError::NotAuthenticated)
        ));
        assert!(!manager.is_refreshing());
    }
}
