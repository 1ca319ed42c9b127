// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3030;
pub const WS_PATH: &str = "ws";

// Session and token lifetimes
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 168;
pub const DEFAULT_SESSION_IDLE_HOURS: i64 = 168;
pub const SESSION_TOKEN_BYTES: usize = 32;

// Messages may only be edited this long after creation
pub const DEFAULT_EDIT_WINDOW_SECS: i64 = 15 * 60;

// Content limits
pub const MAX_CONTENT_LENGTH: usize = 4096;
pub const MAX_EMOJI_LENGTH: usize = 10;
// Largest valid command: every content char written as an escaped surrogate pair
// (`\uD83D\uDE00`, 12 bytes), plus room for the envelope
pub const MAX_FRAME_SIZE: usize = MAX_CONTENT_LENGTH * 12 + 1024;

// Per-connection outbound queue; a full queue counts as a delivery failure
pub const DEFAULT_CONNECTION_QUEUE: usize = 256;

// Offline notification dispatcher
pub const DEFAULT_NOTIFY_QUEUE: usize = 1024;
pub const DEFAULT_NOTIFY_WORKERS: usize = 4;
pub const DEFAULT_NOTIFY_ATTEMPTS: u32 = 3;
pub const NOTIFY_PREVIEW_CHARS: usize = 50;
// Linear backoff step between push retries
pub const NOTIFY_RETRY_BACKOFF_MS: u64 = 500;

// Failed handshakes are padded to at least this long
pub const MIN_AUTH_FAILURE_MS: u64 = 50;

// Idle per-room sequencers are swept once this many rooms have one
pub const SEQUENCER_SWEEP_THRESHOLD: usize = 1024;
