//! Configuration for update and create operations.

use std::fs::File;
use std::io;

/// Default sync mode for write-back.
pub const DEFAULT_SYNC_MODE: SyncMode = SyncMode::Fsync;

/// Default lock acquisition mode.
pub const DEFAULT_LOCK_MODE: LockMode = LockMode::Try;

/// Sync mode for write-back durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Fsync after write-back (default, highest durability).
    #[default]
    Fsync,
    /// Use fdatasync (skip metadata update, faster).
    Fdatasync,
    /// No sync (fastest, lowest durability - for testing only).
    None,
}

impl SyncMode {
    /// Applies this sync mode to a written file.
    pub(crate) fn sync(self, file: &File) -> io::Result<()> {
        match self {
            SyncMode::Fsync => file.sync_all(),
            SyncMode::Fdatasync => file.sync_data(),
            SyncMode::None => Ok(()),
        }
    }
}

/// How the exclusive file lock is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Fail immediately if another process holds the lock (default).
    #[default]
    Try,
    /// Block until the lock becomes available.
    Wait,
}

/// Configuration for update transactions.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Durability of the write-back.
    pub sync_mode: SyncMode,
    /// Lock acquisition behavior.
    pub lock_mode: LockMode,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            sync_mode: DEFAULT_SYNC_MODE,
            lock_mode: DEFAULT_LOCK_MODE,
        }
    }
}

impl UpdateConfig {
    /// Creates a new configuration with custom sync mode.
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    /// Creates a new configuration with custom lock mode.
    pub fn with_lock_mode(mut self, lock_mode: LockMode) -> Self {
        self.lock_mode = lock_mode;
        self
    }
}

/// Configuration for file creation.
#[derive(Debug, Clone, Default)]
pub struct CreateConfig {
    /// Durability of the initial write.
    pub sync_mode: SyncMode,
    /// Replace an existing file instead of failing.
    pub overwrite: bool,
}

impl CreateConfig {
    /// Creates a new configuration with custom sync mode.
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    /// Creates a new configuration that may replace existing files.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_config_defaults() {
        let config = UpdateConfig::default();
        assert_eq!(config.sync_mode, SyncMode::Fsync);
        assert_eq!(config.lock_mode, LockMode::Try);

        let config = config
            .with_sync_mode(SyncMode::None)
            .with_lock_mode(LockMode::Wait);
        assert_eq!(config.sync_mode, SyncMode::None);
        assert_eq!(config.lock_mode, LockMode::Wait);
    }

    #[test]
    fn test_create_config_builders() {
        let config = CreateConfig::default();
        assert!(!config.overwrite);
        let config = config.with_overwrite(true).with_sync_mode(SyncMode::Fdatasync);
        assert!(config.overwrite);
        assert_eq!(config.sync_mode, SyncMode::Fdatasync);
    }
}
