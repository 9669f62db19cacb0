//! The client facade and its host bindings.

use std::sync::Arc;

use crate::{
    auth::{AuthApi, LoginCredentials},
    config::ClientConfig,
    error::MarketKitError,
    events::{EventBus, Route},
    gateway::{ApiRequest, ApiResponse, RequestGateway},
    http_request::Request,
    ledger::{Acknowledgement, NotificationLedger},
    realtime::{ChannelState, RealtimeChannel},
    refresh::RefreshCoordinator,
    session::{CredentialStore, Role, Session},
    storage::KeyValueStore,
    Environment,
};

/// Entry point of the SDK. Wires the credential store, request gateway,
/// refresh coordinator, realtime channel and notification ledger together.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use marketkit_core::{storage::MemoryStore, ClientConfig, LoginCredentials, MarketClient};
/// use marketkit_core::session::Role;
///
/// # async fn run() -> Result<(), marketkit_core::MarketKitError> {
/// let client = MarketClient::new(ClientConfig::default(), Arc::new(MemoryStore::new()))?;
/// let credentials = LoginCredentials {
///     email: "ana@example.com".to_string(),
///     password: "secret".to_string(),
/// };
/// client.login(Role::User, &credentials).await?;
/// client.connect_realtime();
/// # Ok(())
/// # }
/// ```
#[derive(uniffi::Object)]
pub struct MarketClient {
    config: ClientConfig,
    auth: AuthApi,
    store: Arc<CredentialStore>,
    events: EventBus,
    refresh: Arc<RefreshCoordinator>,
    gateway: Arc<RequestGateway>,
    ledger: Arc<NotificationLedger>,
    realtime: RealtimeChannel,
}

impl MarketClient {
    /// Builds a client and restores any session persisted in `storage`.
    ///
    /// # Errors
    ///
    /// - [`MarketKitError::InvalidInput`] if `config` is invalid.
    /// - [`MarketKitError::Storage`] if the persisted session cannot be read.
    pub fn new(
        config: ClientConfig,
        storage: Arc<dyn KeyValueStore>,
    ) -> Result<Self, MarketKitError> {
        config.validate()?;

        let store = Arc::new(CredentialStore::hydrate(storage)?);
        let events = EventBus::new();
        let http = Request::new(config.request_timeout())?;

        let refresh = Arc::new(RefreshCoordinator::new(
            AuthApi::new(&config.api_base_url, http.clone()),
            Arc::clone(&store),
            events.clone(),
            config.refresh_timeout(),
        ));
        let gateway = Arc::new(RequestGateway::new(
            config.clone(),
            http.clone(),
            Arc::clone(&store),
            Arc::clone(&refresh),
            events.clone(),
        ));
        let ledger = Arc::new(NotificationLedger::new(Arc::clone(&gateway)));
        let realtime = RealtimeChannel::new(
            &config,
            Arc::clone(&store),
            Arc::clone(&ledger),
            events.clone(),
        );

        Ok(Self {
            auth: AuthApi::new(&config.api_base_url, http),
            config,
            store,
            events,
            refresh,
            gateway,
            ledger,
            realtime,
        })
    }

    /// The configuration the client was built with.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The credential store.
    #[must_use]
    pub const fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Alerts and navigation requests for the host UI.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// The request gateway, for domain calls.
    #[must_use]
    pub const fn gateway(&self) -> &Arc<RequestGateway> {
        &self.gateway
    }

    /// The refresh coordinator.
    #[must_use]
    pub const fn refresh(&self) -> &Arc<RefreshCoordinator> {
        &self.refresh
    }

    /// The notification ledger.
    #[must_use]
    pub const fn ledger(&self) -> &Arc<NotificationLedger> {
        &self.ledger
    }

    /// The realtime channel.
    #[must_use]
    pub const fn realtime(&self) -> &RealtimeChannel {
        &self.realtime
    }

    /// Current session.
    #[must_use]
    pub fn session(&self) -> Session {
        self.store.read()
    }

    /// Signs in and stores the issued token.
    ///
    /// An account the backend reports as inactive is signed in but blocked
    /// right away, and the host is sent to the blocked view.
    ///
    /// # Errors
    ///
    /// - [`MarketKitError::AccountBlocked`] if the backend refuses a suspended account.
    /// - [`MarketKitError::NetworkError`] for transport failures and rejected credentials.
    /// - [`MarketKitError::Storage`] if the session cannot be persisted.
    pub async fn login(
        &self,
        role: Role,
        credentials: &LoginCredentials,
    ) -> Result<Session, MarketKitError> {
        let response = self.auth.login(role, credentials).await?;
        let role = response.role.unwrap_or(role);
        self.store.login(response.access_token, role)?;

        if !response.active
            && self
                .store
                .set_blocked(response.block_reason.unwrap_or_default())
        {
            self.events.navigate(Route::Blocked);
        }
        Ok(self.store.read())
    }

    /// Signs out. The backend is told on a best-effort basis; the local
    /// session is cleared regardless, which also closes the realtime channel
    /// and empties the ledger.
    pub async fn logout(&self) {
        if self.store.read().is_authenticated() {
            if let Err(err) = self.gateway.send(ApiRequest::post("/logout")).await {
                log::warn!("logout call failed, clearing locally: {err}");
            }
        }
        self.store.clear();
    }

    /// Sends a domain request through the gateway.
    ///
    /// # Errors
    ///
    /// See [`RequestGateway::send`].
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, MarketKitError> {
        self.gateway.send(request).await
    }

    /// Starts the realtime channel. From here on it follows the session:
    /// it connects whenever a token appears and disconnects when it is cleared.
    pub fn connect_realtime(&self) {
        self.realtime.start();
    }
}

#[uniffi::export(async_runtime = "tokio")]
impl MarketClient {
    /// Builds a client for one of the hosted environments.
    ///
    /// # Errors
    ///
    /// See [`MarketClient::new`].
    #[uniffi::constructor]
    pub fn for_environment(
        environment: Environment,
        storage: Arc<dyn KeyValueStore>,
    ) -> Result<Arc<Self>, MarketKitError> {
        Self::new(ClientConfig::from_environment(&environment), storage).map(Arc::new)
    }

    /// Signs in.
    ///
    /// # Errors
    ///
    /// See [`MarketClient::login`].
    pub async fn sign_in(
        &self,
        role: Role,
        credentials: LoginCredentials,
    ) -> Result<(), MarketKitError> {
        self.login(role, &credentials).await.map(|_| ())
    }

    /// Signs out.
    pub async fn sign_out(&self) {
        self.logout().await;
    }

    /// Whether a token is held.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.store.read().is_authenticated()
    }

    /// Whether the account is blocked.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        !self.store.read().account_active()
    }

    /// Starts the realtime channel.
    pub fn start_realtime(&self) {
        self.connect_realtime();
    }

    /// Current realtime connection state.
    #[must_use]
    pub fn channel_state(&self) -> ChannelState {
        self.realtime.state()
    }

    /// Current unread count.
    #[must_use]
    pub fn unread_count(&self) -> u32 {
        self.ledger.unread_count()
    }

    /// Marks one notification read.
    pub async fn mark_notification_read(&self, id: String) -> Acknowledgement {
        self.ledger.mark_read(&id).await
    }

    /// Marks every notification read.
    pub async fn mark_all_notifications_read(&self) -> Acknowledgement {
        self.ledger.mark_all_read().await
    }
}

impl std::fmt::Debug for MarketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketClient")
            .field("api_base_url", &self.config.api_base_url)
            .field("store", &self.store)
            .field("realtime", &self.realtime)
            .finish_non_exhaustive()
    }
}
