use std::time::Duration;

/// Substring a source file's first line must contain to be picked up by the
/// import hook or `build_all`.
pub const OPT_IN_MARKER: &str = "extbuild";

/// Prefix of the rendered sibling of a source file.
pub const RENDERED_PREFIX: &str = ".rendered.";

/// Tag closing every checksum trailer. Exactly eight bytes.
pub const TRAILER_TAG: &[u8; 8] = b"EXTBUILD";

/// Footer: little-endian u64 payload length followed by the tag.
pub const TRAILER_FOOTER_LEN: usize = 8 + TRAILER_TAG.len();

pub const DEFAULT_FILE_EXTS: &[&str] = &[".cpp", ".c"];
pub const DEFAULT_LOCK_SUFFIX: &str = ".lock";
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_LOCK_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_LOCK_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How often a lock attempt re-polls the OS lock within its timeout.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub const ENV_SEARCH_PATH: &str = "EXTBUILD_PATH";
pub const ENV_FORCE_REBUILD: &str = "EXTBUILD_FORCE_REBUILD";
pub const ENV_RELEASE_MODE: &str = "EXTBUILD_RELEASE_MODE";
pub const ENV_FILE_EXTS: &str = "EXTBUILD_FILE_EXTS";
pub const ENV_LOCK_TIMEOUT: &str = "EXTBUILD_LOCK_TIMEOUT";
pub const ENV_BINDING_INCLUDE: &str = "EXTBUILD_BINDING_INCLUDE";
pub const ENV_COMPILER: &str = "EXTBUILD_CC";
pub const ENV_GLOBAL_SYMBOLS: &str = "EXTBUILD_GLOBAL_SYMBOLS";

/// Symbol `extbuild run` calls in a loaded module.
pub const RUN_ENTRY_SYMBOL: &str = "main";
