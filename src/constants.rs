//! Application-wide constants for loom-server.
//!
//! Centralizes wire constants, timeouts and defaults so they can be found
//! in one place.
//!
//! # Categories
//!
//! - **Serial**: loom link line settings
//! - **Timeouts**: client and loom shutdown bounds
//! - **Defaults**: values used when neither CLI nor environment set them
//! - **Pattern files**: size limits for uploaded drafts

use std::time::Duration;

// ============================================================================
// Serial
// ============================================================================

/// Baud rate for the loom serial link.
///
/// Both the binary and the ASCII loom protocols run at 9600 8N1.
pub const BAUD_RATE: u32 = 9600;

/// Frame terminator for the ASCII loom protocol.
pub const TERMINATOR: u8 = b'\r';

/// Frame start byte for the ASCII loom protocol.
pub const ASCII_FRAME_START: u8 = b'=';

/// Size of the read buffer used by the loom read loop.
pub const LOOM_READ_BUFFER_SIZE: usize = 1024;

/// Capacity of the in-process duplex pipe between the link and the mock loom.
pub const MOCK_PIPE_CAPACITY: usize = 4096;

// ============================================================================
// Timeouts
// ============================================================================

/// Upper bound on sending a close frame to a superseded client.
///
/// Closing is best effort; a client that does not drain its socket must not
/// stall the session loop.
pub const CLIENT_CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Upper bound on waiting for the loom read loop to exit on disconnect.
pub const LOOM_READER_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Delay before retrying after a failed accept on the client listener.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

// ============================================================================
// Defaults
// ============================================================================

/// Default number of shafts on the loom.
pub const DEFAULT_NUM_SHAFTS: u32 = 32;

/// Largest supported shaft count (one shaft word fits in a `u64`).
pub const MAX_NUM_SHAFTS: u32 = 64;

/// Default number of patterns retained in the pattern store.
pub const DEFAULT_MAX_PATTERNS: usize = 25;

/// Default WebSocket listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";

/// Serial port argument that selects the in-process mock loom.
pub const MOCK_PORT_NAME: &str = "mock";

/// Directory name under the platform data dir.
pub const APP_DIR_NAME: &str = "loom-server";

/// File name of the pattern store inside [`APP_DIR_NAME`].
pub const PATTERN_DB_FILE: &str = "patterns.json";

// ============================================================================
// Pattern files
// ============================================================================

/// Most picks a pattern file may define.
///
/// Pick and end indices are read from the file, so they are bounded before
/// anything is sized from them.
pub const MAX_PATTERN_PICKS: usize = 100_000;

/// Most warp ends a pattern file may define.
pub const MAX_WARP_ENDS: usize = 100_000;
