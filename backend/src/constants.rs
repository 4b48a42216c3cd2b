// =============================================================================
// Matchchat Backend Constants
// =============================================================================
// Tunables for the realtime match-and-messaging core, kept in one place.

use std::time::Duration;

// =============================================================================
// SESSION TOKENS
// =============================================================================

/// Lifetime of a one-time duplex session token
pub const SESSION_TOKEN_TTL_SECS: u64 = 30;

/// Number of random bytes behind a session token (hex encoded on the wire)
pub const SESSION_TOKEN_BYTES: usize = 32;

/// How often the in-process token store purges expired entries
pub const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Key prefix for tokens stored in Redis
pub const REDIS_SESSION_KEY_PREFIX: &str = "ws_session:";

/// Query parameter carrying the token on the upgrade request
pub const SESSION_QUERY_PARAM: &str = "session";

// =============================================================================
// CONNECTION HUB
// =============================================================================

/// Period between liveness probes sent to every live connection
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Write deadline for a single liveness probe
pub const PROBE_WRITE_WAIT: Duration = Duration::from_secs(5);

/// Write deadline for a pushed frame; a peer that stops reading is dropped
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// A connection with no inbound traffic (pongs included) for this long is dead
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(60);

/// Outbound frames buffered per connection before pushes are dropped
pub const OUTBOUND_BUFFER_SIZE: usize = 256;

/// Largest inbound frame accepted on the duplex channel
pub const MAX_INBOUND_FRAME_BYTES: usize = 4 * 1024;

// =============================================================================
// MATCHING
// =============================================================================

/// Content of the system message seeded into a freshly matched chat
pub const MATCH_MESSAGE: &str = "It's a match! 🎉";

// =============================================================================
// MESSAGE PAGINATION
// =============================================================================

/// Page size when the client does not ask for one
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Upper bound on any requested page size
pub const MAX_PAGE_SIZE: u32 = 200;

/// Longest message body accepted on the request path
pub const MAX_MESSAGE_CHARS: usize = 4000;

// =============================================================================
// DATABASE CONFIGURATION
// =============================================================================

/// Pool size used when DB_MAX_CONNECTIONS is not set
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

// =============================================================================
// SERVER CONFIGURATION
// =============================================================================

/// Default server port if not specified in environment
pub const DEFAULT_SERVER_PORT: u16 = 3000;

/// Shortened token for log lines; full tokens never reach the logs
pub fn token_log_prefix(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    &token[..end]
}
