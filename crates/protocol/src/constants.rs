use std::time::Duration;

/// Default TCP port the relay listens on.
pub const DEFAULT_RELAY_PORT: u16 = 8080;

/// Default time-to-live of an unpaired code, in milliseconds.
pub const DEFAULT_SESSION_CODE_EXPIRY_MS: u64 = 300_000;

/// Default bound of a connection's outbound queue, in messages.
///
/// A peer whose queue saturates is considered too slow and is closed; the
/// stream that remains keeps its ordering intact.
pub const DEFAULT_OUTBOUND_QUEUE_LIMIT: usize = 1024;

/// Default interval between protocol-level pings.
pub const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;

/// Default read deadline: a connection that produces no frame (pong or
/// otherwise) for this long has missed two pings and is closed as dead.
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 55_000;

/// [`DEFAULT_PING_INTERVAL_MS`] as a `Duration`, for clients.
pub const PING_INTERVAL: Duration = Duration::from_millis(DEFAULT_PING_INTERVAL_MS);

/// [`DEFAULT_PING_TIMEOUT_MS`] as a `Duration`, for clients.
pub const PONG_WAIT: Duration = Duration::from_millis(DEFAULT_PING_TIMEOUT_MS);

/// Maximum WebSocket message size (16 MiB).
pub const WS_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Time allowed for the HTTP upgrade handshake before the socket is dropped.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the agent client waits for `registered` after the upgrade.
pub const REGISTER_WAIT: Duration = Duration::from_secs(10);

/// How often the registry sweeper reclaims expired unpaired codes.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
