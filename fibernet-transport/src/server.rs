//! Listening side: accept connections and wrap each in a [`Session`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, ChannelConfig, ChannelError, ChannelResult};
use crate::registry::MessageRegistry;
use crate::session::{Session, SessionConfig, SessionHandler};
use crate::wire::ServiceType;
use fibernet_core::{
    MessageCodec, NetworkProvider, Providers, StreamListener, TaskProvider, TimeProvider,
    error_code,
};

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Live sessions of a server, keyed by session id.
///
/// Sessions remove themselves when disposed.
pub struct SessionRegistry<P: Providers, C: MessageCodec> {
    sessions: Rc<RefCell<BTreeMap<u64, Session<P, C>>>>,
}

impl<P: Providers, C: MessageCodec> Clone for SessionRegistry<P, C> {
    fn clone(&self) -> Self {
        Self {
            sessions: self.sessions.clone(),
        }
    }
}

impl<P: Providers, C: MessageCodec> SessionRegistry<P, C> {
    fn new() -> Self {
        Self {
            sessions: Rc::new(RefCell::new(BTreeMap::new())),
        }
    }

    /// Look up a session.
    pub fn get(&self, id: u64) -> Option<Session<P, C>> {
        self.sessions.borrow().get(&id).cloned()
    }

    /// Ids of live sessions, ascending.
    pub fn ids(&self) -> Vec<u64> {
        self.sessions.borrow().keys().copied().collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.borrow().len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.borrow().is_empty()
    }

    fn insert(&self, session: Session<P, C>) {
        self.sessions.borrow_mut().insert(session.id(), session);
    }

    fn remove(&self, id: u64) -> Option<Session<P, C>> {
        self.sessions.borrow_mut().remove(&id)
    }
}

/// Settings for a [`NetServer`].
#[derive(Clone, Debug)]
pub struct NetServerConfig {
    /// Frame layout spoken by accepted connections.
    pub service: ServiceType,
    /// Channel settings for accepted connections.
    pub channel: ChannelConfig,
    /// Session settings for accepted connections.
    pub session: SessionConfig,
}

impl NetServerConfig {
    /// Defaults for the given frame layout.
    pub fn new(service: ServiceType) -> Self {
        Self {
            service,
            channel: ChannelConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Accepts connections and keeps one [`Session`] per connection.
///
/// Dropping the server stops accepting; call [`shutdown`](Self::shutdown)
/// to also dispose live sessions.
pub struct NetServer<P: Providers, C: MessageCodec> {
    local_address: String,
    sessions: SessionRegistry<P, C>,
    shutdown: CancellationToken,
}

impl<P: Providers, C: MessageCodec> NetServer<P, C> {
    /// Bind `address` and start accepting.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Io`] if the listener cannot be bound.
    pub async fn bind(
        providers: &P,
        address: &str,
        config: NetServerConfig,
        registry: Rc<MessageRegistry<C>>,
        codec: C,
        handler: Rc<dyn SessionHandler<P, C>>,
    ) -> ChannelResult<Self> {
        let listener = providers.network().bind(address).await?;
        let local_address = listener.local_addr()?;
        let sessions = SessionRegistry::new();
        let shutdown = CancellationToken::new();

        tracing::info!(address = %local_address, service = ?config.service, "server listening");

        providers.task().spawn_task(
            "server_accept_loop",
            accept_loop(
                providers.clone(),
                listener,
                config,
                registry,
                codec,
                handler,
                sessions.clone(),
                shutdown.clone(),
            ),
        );

        Ok(Self {
            local_address,
            sessions,
            shutdown,
        })
    }

    /// Address the listener is bound to.
    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    /// Live sessions.
    pub fn sessions(&self) -> &SessionRegistry<P, C> {
        &self.sessions
    }

    /// Stop accepting and dispose every live session.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for id in self.sessions.ids() {
            if let Some(session) = self.sessions.remove(id) {
                session.dispose(error_code::ERR_SESSION_DISPOSED);
            }
        }
    }
}

impl<P: Providers, C: MessageCodec> Drop for NetServer<P, C> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
async fn accept_loop<P: Providers, C: MessageCodec>(
    providers: P,
    listener: <P::Network as NetworkProvider>::Listener,
    config: NetServerConfig,
    registry: Rc<MessageRegistry<C>>,
    codec: C,
    handler: Rc<dyn SessionHandler<P, C>>,
    sessions: SessionRegistry<P, C>,
    shutdown: CancellationToken,
) {
    let mut next_id: u64 = 1;

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                let error = ChannelError::from(e);
                tracing::warn!(%error, "accept failed");
                providers.time().sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        let id = next_id;
        next_id += 1;

        let channel = Channel::new(&providers, id, stream, config.service, config.channel.clone())
            .with_remote_address(peer.clone());
        let session = Session::new(
            &providers,
            id,
            channel,
            registry.clone(),
            codec.clone(),
            config.session.clone(),
            handler.clone(),
        );
        sessions.insert(session.clone());
        tracing::debug!(session = id, %peer, "accepted connection");

        let closed = session.closed();
        let sessions = sessions.clone();
        providers.task().spawn_task("server_session_watch", async move {
            closed.await;
            sessions.remove(id);
        });
    }
}
