//! Error taxonomy for the core driver.
//!
//! Every public entry point returns `Result<T, Error>`. There is no `panic!`,
//! `.unwrap()` or `.expect()` anywhere in non-test code: every failure path
//! named in the error taxonomy below is returned to the caller instead.

/// One variant per error kind the driver can raise.
///
/// Unlike the source this was distilled from (which mixes negative errno
/// returns with NULL pointers, and leaks resources on several error paths),
/// every fallible operation here returns one of these variants with no
/// intermediate handles left dangling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A path component does not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    /// Intermediate path component lacks the DIRECTORY attribute.
    #[error("not a directory: {0}")]
    NotDir(String),

    /// Unlinking a directory, or an operation that requires a plain file.
    #[error("is a directory: {0}")]
    IsDir(String),

    /// Removing a directory that still has live entries in it.
    #[error("directory not empty: {0}")]
    NotEmpty(String),

    /// Rename destination already exists.
    #[error("already exists: {0}")]
    Exists(String),

    /// Write/delete/utimens on an entry whose READ_ONLY attribute is set.
    #[error("permission denied: {0}")]
    Access(String),

    /// Free map empty when an allocation was requested.
    #[error("no space left on device")]
    NoSpace,

    /// Seek past end, unknown whence, reserved-name create, and similar.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// FAT cycle, out-of-range cluster reference, or bad magic at mount.
    #[error("corrupt filesystem: {0}")]
    CorruptFs(String),

    /// The underlying block device failed a read, write, or seek.
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound(path.into())
    }

    pub fn not_dir(path: impl Into<String>) -> Self {
        Error::NotDir(path.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::Invalid(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptFs(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Short-name bytes, used in a couple of error messages where a `Display`
/// impl would otherwise have to live in the `entry` module.
pub(crate) fn name_lossy(name: &[u8]) -> String {
    String::from_utf8_lossy(name).trim_end().to_string()
}
