//! Idle session reaper.

use std::rc::Weak;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::core::{Session, SessionInner};
use fibernet_core::{MessageCodec, Providers, TaskProvider, TimeProvider, error_code};

/// Periodically disposes a session that has been silent too long.
///
/// Silence means neither a packet received nor a packet sent within
/// `timeout`. The checker stops when the session is disposed or dropped.
pub struct IdleChecker;

impl IdleChecker {
    /// Start checking `session`.
    pub fn spawn<P: Providers, C: MessageCodec>(
        session: &Session<P, C>,
        timeout: Duration,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let weak = session.downgrade();
        let shutdown = session.shutdown_token();
        session.providers().task().spawn_task(
            "session_idle_checker",
            idle_check_loop(weak, session.providers().clone(), shutdown, timeout, interval),
        )
    }
}

async fn idle_check_loop<P: Providers, C: MessageCodec>(
    session: Weak<SessionInner<P, C>>,
    providers: P,
    shutdown: CancellationToken,
    timeout: Duration,
    interval: Duration,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = providers.time().sleep(interval) => {}
        }

        let Some(session) = Session::upgrade(&session) else {
            return;
        };
        let now = providers.time().now();
        let last_activity = session.last_recv().max(session.last_send());
        if now.saturating_sub(last_activity) > timeout {
            tracing::info!(
                session = session.id(),
                idle = ?now.saturating_sub(last_activity),
                "session idle, disposing"
            );
            session.dispose(error_code::ERR_SESSION_IDLE);
            return;
        }
    }
}
