use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};

use super::grant::TokenEndpoint;
use super::types::{AuthOperation, AuthState, Credentials, TokenState};
use crate::error::AuthFailure;

/// One authentication attempt, awaited by every caller that needs its result
type AuthFlight = Shared<BoxFuture<'static, Result<(), AuthFailure>>>;

/// What a caller needs from the token state
#[derive(Debug)]
enum TokenNeed {
    /// A usable access token
    Usable,
    /// Something other than the token the server just rejected
    Replacement(Option<String>),
}

/// Everything a grant needs; owned by in-flight futures
///
/// Holds no reference to the in-flight slot, so a flight stored in the
/// slot never keeps the slot itself alive.
#[derive(Clone)]
struct Grants {
    /// Tokens and last failure
    state: Arc<RwLock<TokenState>>,

    /// Token endpoint client
    endpoint: TokenEndpoint,

    /// Credentials for the client_credentials grant
    credentials: Option<Credentials>,
}

impl Grants {
    async fn run(&self, operation: AuthOperation) -> Result<(), AuthFailure> {
        match operation {
            AuthOperation::Authenticate => self.authenticate().await,
            AuthOperation::Refresh => self.refresh().await,
        }
    }

    /// Credential grant
    async fn authenticate(&self) -> Result<(), AuthFailure> {
        let Some(creds) = &self.credentials else {
            return Ok(());
        };

        match self.endpoint.credential_grant(creds).await {
            Ok(response) => {
                self.state.write().await.store(response);
                tracing::info!("✅ Authentication successful");
                Ok(())
            }
            Err(failure) => {
                tracing::error!(failure = %failure, "❌ Authentication failed");
                self.state.write().await.clear(failure.clone());
                Err(failure)
            }
        }
    }

    /// Refresh grant, then credential grant, then give up
    async fn refresh(&self) -> Result<(), AuthFailure> {
        let refresh_token = self.state.read().await.refresh_token.clone();

        if let Some(refresh_token) = refresh_token {
            match self.endpoint.refresh_grant(&refresh_token).await {
                Ok(response) => {
                    self.state.write().await.store(response);
                    tracing::info!("✅ Access token refreshed");
                    return Ok(());
                }
                Err(failure) => {
                    tracing::warn!(failure = %failure, "Token refresh failed");
                }
            }
        }

        if self.credentials.is_some() {
            tracing::info!("Falling back to credential grant");
            return self.authenticate().await;
        }

        tracing::error!("❌ Refresh failed and no credentials configured, session expired");
        self.state.write().await.clear(AuthFailure::SessionExpired);
        Err(AuthFailure::SessionExpired)
    }
}

/// Authentication manager
/// Owns the token state and makes sure at most one grant call is in flight
pub struct AuthManager {
    /// Token state, endpoint and credentials
    grants: Grants,

    /// The in-flight authentication, if any
    in_flight: Arc<Mutex<Option<AuthFlight>>>,

    /// Whether tokens were seeded or credentials given at construction
    configured: bool,

    /// Refresh this many seconds before a known expiry
    refresh_threshold: i64,
}

impl AuthManager {
    /// Create a manager from seeded tokens and/or credentials
    pub fn new(
        endpoint: TokenEndpoint,
        credentials: Option<Credentials>,
        seed: TokenState,
        refresh_threshold: u64,
    ) -> Self {
        let configured = credentials.is_some()
            || seed.access_token.is_some()
            || seed.refresh_token.is_some();

        tracing::debug!(
            configured,
            has_credentials = credentials.is_some(),
            seeded_access_token = seed.access_token.is_some(),
            seeded_refresh_token = seed.refresh_token.is_some(),
            token_url = %endpoint.url(),
            "Auth manager created"
        );

        Self {
            grants: Grants {
                state: Arc::new(RwLock::new(seed)),
                endpoint,
                credentials,
            },
            in_flight: Arc::new(Mutex::new(None)),
            configured,
            refresh_threshold: refresh_threshold as i64,
        }
    }

    /// Whether authentication is configured at all
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Current position in the authentication state machine
    pub async fn state(&self) -> AuthState {
        if !self.configured {
            return AuthState::NoAuth;
        }
        if self.in_flight.lock().await.is_some() {
            return AuthState::Authenticating;
        }
        if self.grants.state.read().await.needs_token(self.refresh_threshold) {
            AuthState::Unauthenticated
        } else {
            AuthState::Authenticated
        }
    }

    /// Last recorded authentication failure
    pub async fn last_error(&self) -> Option<AuthFailure> {
        self.grants.state.read().await.last_error.clone()
    }

    /// Access token currently held, without triggering any authentication
    pub async fn current_token(&self) -> Option<String> {
        self.grants.state.read().await.access_token.clone()
    }

    /// Get an access token to attach to an outgoing request
    ///
    /// Joins or starts the in-flight authentication when the token is missing
    /// or about to expire. Failures are recorded, not returned: the caller
    /// proceeds without a bearer credential.
    pub async fn ensure_token(&self) -> Option<String> {
        if !self.configured {
            return None;
        }

        let operation = {
            let state = self.grants.state.read().await;
            if !state.needs_token(self.refresh_threshold) {
                return state.access_token.clone();
            }
            match (&state.access_token, &state.refresh_token, &self.grants.credentials) {
                // Expiring soon
                (Some(_), Some(_), _) | (Some(_), None, Some(_)) => AuthOperation::Refresh,
                // Expiring, nothing to renew it with: use it while it lasts
                (Some(token), None, None) => return Some(token.clone()),
                (None, _, Some(_)) => AuthOperation::Authenticate,
                (None, Some(_), None) => AuthOperation::Refresh,
                (None, None, None) => return None,
            }
        };

        if let Err(failure) = self.single_flight(operation, TokenNeed::Usable).await {
            tracing::warn!(
                failure = %failure,
                "Authentication failed, sending request without bearer credential"
            );
        }

        self.current_token().await
    }

    /// React to a 401 for a request sent with `rejected`
    ///
    /// Runs the refresh operation unless a concurrent one already replaced
    /// the rejected token, and returns whatever access token results.
    pub async fn handle_unauthorized(&self, rejected: Option<&str>) -> Option<String> {
        if !self.configured {
            return None;
        }

        let need = TokenNeed::Replacement(rejected.map(str::to_string));
        if let Err(failure) = self.single_flight(AuthOperation::Refresh, need).await {
            tracing::warn!(failure = %failure, "Recovery after 401 failed");
        }

        self.current_token().await
    }

    /// Join the in-flight authentication or start `operation` as the new one
    async fn single_flight(
        &self,
        operation: AuthOperation,
        need: TokenNeed,
    ) -> Result<(), AuthFailure> {
        let flight = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                Some(existing) => {
                    tracing::debug!(?operation, "Joining in-flight authentication");
                    existing.clone()
                }
                None => {
                    // A flight may have finished between the caller's check and this lock
                    if self.is_satisfied(&need).await {
                        return Ok(());
                    }

                    tracing::debug!(?operation, "Starting authentication");
                    let grants = self.grants.clone();
                    let slot_handle: Weak<Mutex<Option<AuthFlight>>> =
                        Arc::downgrade(&self.in_flight);
                    let flight = async move {
                        let result = grants.run(operation).await;
                        if let Some(slot) = slot_handle.upgrade() {
                            slot.lock().await.take();
                        }
                        result
                    }
                    .boxed()
                    .shared();

                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    async fn is_satisfied(&self, need: &TokenNeed) -> bool {
        let state = self.grants.state.read().await;
        match need {
            TokenNeed::Usable => !state.needs_token(self.refresh_threshold),
            TokenNeed::Replacement(rejected) => {
                state.access_token.is_some() && state.access_token != *rejected
            }
        }
    }
}
