//! Per-origin session reuse and protocol selection.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::transport::{AlpnProtocol, ConnectOptions, Connector, Origin, PushSink, TransportSession};

struct SessionRecord {
    session: Arc<dyn TransportSession>,
    last_activity: Instant,
}

#[derive(Default)]
struct PoolState {
    sessions: HashMap<Origin, SessionRecord>,
    /// Origins where ALPN settled on HTTP/1.1 despite an h2 preference; the
    /// downgrade sticks until `disconnect_all` empties the pool.
    h1_origins: HashSet<Origin>,
}

/// A per-origin cache of transport sessions.
///
/// The first request to an origin dials it with the context's ordered ALPN
/// preference (`http://` is always HTTP/1.1); later requests reuse the live
/// session. When negotiation lands on HTTP/1.1 even though HTTP/2 was
/// preferred, the origin is remembered as h1-only so reconnects skip the
/// doomed upgrade attempt.
pub(crate) struct SessionPool {
    connector: Arc<dyn Connector>,
    push_sink: Arc<dyn PushSink>,
    https_protocols: Vec<AlpnProtocol>,
    push_promise_timeout: Duration,
    state: Mutex<PoolState>,
}

impl SessionPool {
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        https_protocols: Vec<AlpnProtocol>,
        push_promise_timeout: Duration,
        push_sink: Arc<dyn PushSink>,
    ) -> Self {
        Self {
            connector,
            push_sink,
            https_protocols,
            push_promise_timeout,
            state: Mutex::new(PoolState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a live session for the origin, dialing one if needed.
    ///
    /// The connect happens outside the lock; two racing requests to a cold
    /// origin may both dial, and the loser's session is closed.
    pub(crate) async fn acquire(&self, origin: &Origin) -> Result<Arc<dyn TransportSession>> {
        {
            let mut state = self.lock();
            if let Some(record) = state.sessions.get_mut(origin) {
                if record.session.is_closed() {
                    state.sessions.remove(origin);
                } else {
                    log::trace!("pool: reusing {} (idle {:?})", origin, record.last_activity.elapsed());
                    record.last_activity = Instant::now();
                    return Ok(record.session.clone());
                }
            }
        }

        let protocols = self.preference(origin);
        let attempted_h2 = protocols.contains(&AlpnProtocol::Http2);
        let options = ConnectOptions {
            protocols,
            push_promise_timeout: self.push_promise_timeout,
        };
        let session: Arc<dyn TransportSession> =
            Arc::from(self.connector.connect(origin, options, self.push_sink.clone()).await?);
        log::debug!("pool: connected {} over {}", origin, session.protocol());

        let replaced = {
            let mut state = self.lock();
            if attempted_h2 && session.protocol() == AlpnProtocol::Http1 {
                state.h1_origins.insert(origin.clone());
            }
            state
                .sessions
                .insert(
                    origin.clone(),
                    SessionRecord { session: session.clone(), last_activity: Instant::now() },
                )
                .map(|old| old.session)
        };
        if let Some(old) = replaced {
            old.close().await;
        }
        Ok(session)
    }

    fn preference(&self, origin: &Origin) -> Vec<AlpnProtocol> {
        if !origin.is_secure() {
            return vec![AlpnProtocol::Http1];
        }
        if self.lock().h1_origins.contains(origin) {
            return vec![AlpnProtocol::Http1];
        }
        self.https_protocols.clone()
    }

    /// Closes every session; later requests re-open lazily.
    pub(crate) async fn disconnect_all(&self) {
        let sessions: Vec<Arc<dyn TransportSession>> = {
            let mut state = self.lock();
            state.h1_origins.clear();
            state.sessions.drain().map(|(_, record)| record.session).collect()
        };
        for session in sessions {
            session.close().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("SessionPool")
            .field("sessions", &state.sessions.len())
            .field("h1_origins", &state.h1_origins.len())
            .field("https_protocols", &self.https_protocols)
            .finish_non_exhaustive()
    }
}
