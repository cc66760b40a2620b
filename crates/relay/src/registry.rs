//! The session registry: the relay's only shared mutable state.
//!
//! Owns the code-to-pair map and its reverse indices, and enforces the
//! pairing invariants: at most one pair per code, one agent and at most one
//! browser per pair, single-use join, expiry for unpaired codes.
//!
//! Every operation takes one short critical section over in-memory maps.
//! Lookups hand back cloned [`Sender`] handles so callers perform all sends
//! outside the lock; nothing here ever touches a socket.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use termlink_protocol::code::SessionCode;
use termlink_protocol::messages::ErrorCode;
use termlink_protocol::types::SessionId;

use crate::connection::{ConnId, Sender};

/// How many fresh codes to draw before declaring the code space saturated.
const CODE_RETRY_BUDGET: usize = 100;

/// One side of a pair: the connection id plus its outbound queue handle.
#[derive(Clone)]
pub struct Peer {
    pub conn_id: ConnId,
    pub sender: Sender,
}

/// A live agent-browser pairing.
struct Pair {
    session_id: SessionId,
    agent: Peer,
    browser: Option<Peer>,
    created_at: Instant,
    /// `None` while a browser is attached (expiry disabled).
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    pairs: HashMap<SessionCode, Pair>,
    by_session: HashMap<SessionId, SessionCode>,
    by_agent: HashMap<ConnId, SessionCode>,
    by_browser: HashMap<ConnId, SessionCode>,
    /// Sessions whose agent disconnected, kept for one TTL so `rejoin` can
    /// tell a dead agent apart from a session that never existed.
    retired: HashMap<SessionId, Instant>,
}

impl Inner {
    /// Drops a pair and every index entry pointing at it.
    fn remove_pair_entry(&mut self, code: SessionCode) -> Option<Pair> {
        let pair = self.pairs.remove(&code)?;
        self.by_session.remove(&pair.session_id);
        self.by_agent.remove(&pair.agent.conn_id);
        if let Some(browser) = &pair.browser {
            self.by_browser.remove(&browser.conn_id);
        }
        Some(pair)
    }
}

/// Result of [`Registry::create_pair`].
#[derive(Debug, Clone, Copy)]
pub struct NewPair {
    pub code: SessionCode,
    pub session_id: SessionId,
}

/// Result of a successful `join` or `rejoin`.
#[derive(Debug)]
pub struct JoinOk {
    pub session_id: SessionId,
    /// The paired agent's queue, for the `browser_connected` notification.
    pub agent: Sender,
}

impl PartialEq for JoinOk {
    fn eq(&self, other: &Self) -> bool {
        self.session_id == other.session_id
    }
}

/// Result of [`Registry::remove_pair`] and friends.
pub struct RemovedPair {
    pub code: SessionCode,
    pub session_id: SessionId,
    /// The attached browser's queue, if any, for the teardown notification.
    pub browser: Option<Sender>,
}

/// Routing data for an agent connection in `Active` state.
pub struct AgentRoute {
    pub session_id: SessionId,
    pub browser: Option<Sender>,
}

/// Routing data for a browser connection in `Active` state.
pub struct BrowserRoute {
    pub session_id: SessionId,
    pub agent: Sender,
}

/// Introspection snapshot of a pair, used by tests and diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct PairSnapshot {
    pub session_id: SessionId,
    pub browser_attached: bool,
    pub created_at: Instant,
    pub expires_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CreatePairError {
    #[error("pairing code space saturated")]
    CodeSpaceExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("unknown pairing code")]
    InvalidCode,

    #[error("pairing code expired")]
    ExpiredCode,

    #[error("session already has a viewer")]
    AlreadyJoined,
}

impl JoinError {
    pub fn error_code(self) -> ErrorCode {
        match self {
            Self::InvalidCode => ErrorCode::InvalidCode,
            Self::ExpiredCode => ErrorCode::ExpiredCode,
            Self::AlreadyJoined => ErrorCode::AlreadyJoined,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejoinError {
    #[error("no such session")]
    NotFound,

    #[error("the agent for this session has disconnected")]
    MacDisconnected,

    #[error("session already has a viewer")]
    AlreadyJoined,
}

impl RejoinError {
    pub fn error_code(self) -> ErrorCode {
        match self {
            Self::NotFound => ErrorCode::NotFound,
            Self::MacDisconnected => ErrorCode::MacDisconnected,
            Self::AlreadyJoined => ErrorCode::AlreadyJoined,
        }
    }
}

/// The authoritative in-memory map of pairing codes to pairs.
pub struct Registry {
    code_ttl: Duration,
    inner: Mutex<Inner>,
}

impl Registry {
    /// Creates an empty registry. `code_ttl` is the unpaired-code lifetime,
    /// also applied after a browser disconnect to bound the rejoin window.
    pub fn new(code_ttl: Duration) -> Self {
        Self {
            code_ttl,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Creates a pair for a freshly upgraded agent connection.
    ///
    /// Codes are drawn uniformly from the alphabet and redrawn on collision;
    /// exhausting the retry budget means the registry is pathologically full.
    pub fn create_pair(&self, agent: Peer) -> Result<NewPair, CreatePairError> {
        let now = Instant::now();
        let mut rng = rand::thread_rng();
        let mut inner = self.lock();

        let mut code = None;
        for _ in 0..CODE_RETRY_BUDGET {
            let candidate = SessionCode::generate(&mut rng);
            if !inner.pairs.contains_key(&candidate) {
                code = Some(candidate);
                break;
            }
        }
        let code = code.ok_or(CreatePairError::CodeSpaceExhausted)?;

        let session_id = SessionId::new();
        inner.by_session.insert(session_id, code);
        inner.by_agent.insert(agent.conn_id, code);
        inner.pairs.insert(
            code,
            Pair {
                session_id,
                agent,
                browser: None,
                created_at: now,
                expires_at: Some(now + self.code_ttl),
            },
        );

        Ok(NewPair { code, session_id })
    }

    /// Attaches a browser to the pair named by `code`.
    ///
    /// Input is canonicalized case-insensitively; anything that does not
    /// parse as a code is `INVALID_CODE`. A code at or past its expiry is
    /// removed and reported `EXPIRED_CODE`. A pair that already has a
    /// browser is `ALREADY_JOINED`. On success the browser is indexed and
    /// expiry is disabled.
    pub fn join(&self, code: &str, browser: Peer) -> Result<JoinOk, JoinError> {
        let code = SessionCode::parse(code).map_err(|_| JoinError::InvalidCode)?;
        let now = Instant::now();
        let mut inner = self.lock();

        match inner.pairs.get(&code) {
            None => return Err(JoinError::InvalidCode),
            Some(pair) => {
                if pair.browser.is_some() {
                    return Err(JoinError::AlreadyJoined);
                }
                if pair.expires_at.is_some_and(|at| now >= at) {
                    inner.remove_pair_entry(code);
                    return Err(JoinError::ExpiredCode);
                }
            }
        }

        let browser_conn = browser.conn_id;
        let pair = inner.pairs.get_mut(&code).ok_or(JoinError::InvalidCode)?;
        pair.browser = Some(browser);
        pair.expires_at = None;
        let result = JoinOk {
            session_id: pair.session_id,
            agent: pair.agent.sender.clone(),
        };
        inner.by_browser.insert(browser_conn, code);
        Ok(result)
    }

    /// Re-attaches a browser to a session it was previously joined to.
    ///
    /// Same filters as [`join`](Self::join), except unknown or unparsable
    /// session ids are `NOT_FOUND` and a session whose agent is gone is
    /// `MAC_DISCONNECTED`.
    pub fn rejoin(&self, session_id: &str, browser: Peer) -> Result<JoinOk, RejoinError> {
        let session_id: SessionId = session_id.parse().map_err(|_| RejoinError::NotFound)?;
        let now = Instant::now();
        let mut inner = self.lock();

        if inner.retired.contains_key(&session_id) {
            return Err(RejoinError::MacDisconnected);
        }
        let code = *inner
            .by_session
            .get(&session_id)
            .ok_or(RejoinError::NotFound)?;

        match inner.pairs.get(&code) {
            None => return Err(RejoinError::NotFound),
            Some(pair) => {
                if pair.browser.is_some() {
                    return Err(RejoinError::AlreadyJoined);
                }
                if pair.expires_at.is_some_and(|at| now >= at) {
                    inner.remove_pair_entry(code);
                    return Err(RejoinError::NotFound);
                }
            }
        }

        let browser_conn = browser.conn_id;
        let pair = inner.pairs.get_mut(&code).ok_or(RejoinError::NotFound)?;
        pair.browser = Some(browser);
        pair.expires_at = None;
        let result = JoinOk {
            session_id: pair.session_id,
            agent: pair.agent.sender.clone(),
        };
        inner.by_browser.insert(browser_conn, code);
        Ok(result)
    }

    /// Routing data for an active agent connection.
    pub fn agent_route(&self, conn: ConnId) -> Option<AgentRoute> {
        let inner = self.lock();
        let code = inner.by_agent.get(&conn)?;
        let pair = inner.pairs.get(code)?;
        Some(AgentRoute {
            session_id: pair.session_id,
            browser: pair.browser.as_ref().map(|p| p.sender.clone()),
        })
    }

    /// Routing data for an active browser connection.
    pub fn browser_route(&self, conn: ConnId) -> Option<BrowserRoute> {
        let inner = self.lock();
        let code = inner.by_browser.get(&conn)?;
        let pair = inner.pairs.get(code)?;
        Some(BrowserRoute {
            session_id: pair.session_id,
            agent: pair.agent.sender.clone(),
        })
    }

    /// Detaches a disconnected browser, arming the rejoin window.
    ///
    /// Returns the agent's queue for the `browser_disconnected` notification.
    pub fn disconnect_browser(&self, conn: ConnId) -> Option<Sender> {
        let mut inner = self.lock();
        let code = inner.by_browser.remove(&conn)?;
        let expires_at = Instant::now() + self.code_ttl;
        let pair = inner.pairs.get_mut(&code)?;
        pair.browser = None;
        pair.expires_at = Some(expires_at);
        Some(pair.agent.sender.clone())
    }

    /// Destroys a pair outright, retiring its session id.
    pub fn remove_pair(&self, code: SessionCode) -> Option<RemovedPair> {
        let now = Instant::now();
        let mut inner = self.lock();
        let pair = inner.remove_pair_entry(code)?;
        inner.retired.insert(pair.session_id, now);
        Some(RemovedPair {
            code,
            session_id: pair.session_id,
            browser: pair.browser.map(|p| p.sender),
        })
    }

    /// Destroys the pair owned by a disconnected agent.
    pub fn remove_pair_by_agent(&self, conn: ConnId) -> Option<RemovedPair> {
        let code = {
            let inner = self.lock();
            *inner.by_agent.get(&conn)?
        };
        self.remove_pair(code)
    }

    /// Looks up a pair without checking expiry.
    pub fn get_by_code(&self, code: SessionCode) -> Option<PairSnapshot> {
        let inner = self.lock();
        let pair = inner.pairs.get(&code)?;
        Some(PairSnapshot {
            session_id: pair.session_id,
            browser_attached: pair.browser.is_some(),
            created_at: pair.created_at,
            expires_at: pair.expires_at,
        })
    }

    /// Reclaims unpaired pairs whose expiry has passed, and prunes retired
    /// session ids older than one TTL. Returns the number of pairs removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();

        let expired: Vec<SessionCode> = inner
            .pairs
            .iter()
            .filter(|(_, pair)| {
                pair.browser.is_none() && pair.expires_at.is_some_and(|at| at < now)
            })
            .map(|(code, _)| *code)
            .collect();
        for code in &expired {
            inner.remove_pair_entry(*code);
        }

        let ttl = self.code_ttl;
        inner.retired.retain(|_, at| now.duration_since(*at) < ttl);

        expired.len()
    }

    /// Number of live pairs.
    pub fn pair_count(&self) -> usize {
        self.lock().pairs.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("registry mutex poisoned")
    }
}
