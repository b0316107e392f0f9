// Dispatch core constants (no magic values)
use std::time::Duration;

/// Sleep after a worker error before the next request (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Buffered events per subscriber before lagging subscribers lose old ones
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Maximum job type length in create_job (chars)
pub const MAX_JOB_TYPE_LEN: usize = 128;

/// Maximum serialized payload size in create_job (10MB)
pub const MAX_DATA_BYTES: usize = 10_000_000;

/// Log line recorded on jobs found ACTIVE at startup
pub const CRASH_RECOVERY_ERROR: &str = "unexpectedly terminated";

/// Log line recorded on jobs still running when the shutdown deadline elapses
pub const SHUTDOWN_TIMEOUT_ERROR: &str = "shutdown timeout";
