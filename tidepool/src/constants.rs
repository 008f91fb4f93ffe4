//! Wire-level names and default tuning shared by every node of a fleet.
//!
//! Exchange names and reply markers are part of the cross-node protocol:
//! every node of a fleet must agree on them.

use std::time::Duration;

/// Fan-out exchange carrying remote `send`/`close` requests.
pub const DIST_FUNC_EXCHANGE: &str = "DIST_FUNC_EXCHANGE";

/// Reply body sent by the owning node when the local operation succeeded.
pub const REMOTE_FUNC_SUCCESS_RESPONSE: &str = "REMOTE_FUNC_SUCCESS_RESPONSE";

/// Reply body sent by the owning node when the local operation failed.
pub const REMOTE_FUNC_FAIL_RESPONSE: &str = "REMOTE_FUNC_FAIL_RESPONSE";

/// Prefix of the per-tag fan-out exchanges used for global broadcast.
pub const GLOBAL_MESSAGE_PREFIX: &str = "GLOBAL_MESSAGE_SUBSCRIBE_";

/// Existence store value for a key held by some node.
pub const EXISTS: &str = "EXISTS";

/// Existence store value for a key held by no node.
pub const NOT_EXISTS: &str = "NOT_EXISTS";

/// Default interval between heartbeat ping sweeps.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(6);

/// Default delay between a ping sweep and its eviction check.
pub const DEFAULT_PONG_DELAY: Duration = Duration::from_secs(20);

/// Default number of unanswered pings tolerated before eviction.
pub const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 2;

/// Default time a caller waits for the owning node to reply.
pub const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of broker connection attempts before the link is down.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 10;

/// Reconnect delay grows by this much per attempt.
pub const DEFAULT_RECONNECT_STEP: Duration = Duration::from_millis(500);

/// Upper bound of the reconnect delay.
pub const DEFAULT_RECONNECT_CAP: Duration = Duration::from_millis(3000);

/// Default period of the registry size log line.
pub const DEFAULT_DIAGNOSTICS_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Name of the fan-out exchange for a global broadcast tag.
pub fn global_message_exchange(tag: &str) -> String {
    format!("{GLOBAL_MESSAGE_PREFIX}{tag}")
}
