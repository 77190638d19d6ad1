//! Build metadata generated by the build script.
//!
//! The snapshot format version is the compatibility key for persisted store
//! snapshots: a snapshot written by a build with a different version is
//! rejected on load.

include!(concat!(env!("OUT_DIR"), "/version.rs"));

/// Fallback when the manifest carried no usable format version
const DEFAULT_STORE_FORMAT_VERSION: u32 = 20251017;

/// Snapshot format version as a number
pub fn store_format_version() -> u32 {
    STORE_FORMAT_VERSION
        .parse()
        .unwrap_or(DEFAULT_STORE_FORMAT_VERSION)
}

/// Build time string from the build script (UTC)
pub fn build_time() -> &'static str {
    BUILD_TIME
}

/// Short git hash captured by the build script
pub fn git_hash() -> &'static str {
    GIT_HASH
}

/// One-line version banner used by `--version` and startup logging
pub fn long_version() -> String {
    format!(
        "{} (git {}, built {}, store format {})",
        env!("CARGO_PKG_VERSION"),
        git_hash(),
        build_time(),
        store_format_version()
    )
}
