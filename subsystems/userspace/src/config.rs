//! # Userland Configuration

use alloc::string::String;

/// Reserved path that opens the console instead of a file
pub const CONSOLE_PATH: &str = "/dev/console";

/// Longest path accepted from a user program, terminator excluded
pub const MAX_USER_PATH: usize = 256;

/// Userland configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserlandConfig {
    /// Path that yields the console handle
    pub console_path: String,
    /// Block device `lkuser test` mounts
    pub boot_device: String,
    /// Mount point used by `lkuser test`
    pub test_mount_point: String,
    /// Filesystem type used by `lkuser test`
    pub test_fs_type: String,
    /// Binary `lkuser test` loads and runs
    pub test_binary: String,
    /// Longest user path
    pub max_path_len: usize,
}

impl Default for UserlandConfig {
    fn default() -> Self {
        Self {
            console_path: String::from(CONSOLE_PATH),
            boot_device: String::from("virtio0"),
            test_mount_point: String::from("/lku"),
            test_fs_type: String::from("fat"),
            test_binary: String::from("/lku/bin/hello"),
            max_path_len: MAX_USER_PATH,
        }
    }
}

impl UserlandConfig {
    /// Set the console path
    pub fn with_console_path(mut self, path: &str) -> Self {
        self.console_path = String::from(path);
        self
    }

    /// Set the device, mount point, filesystem and binary `lkuser test` uses
    pub fn with_test_image(mut self, device: &str, mount_point: &str, fs_type: &str, binary: &str) -> Self {
        self.boot_device = String::from(device);
        self.test_mount_point = String::from(mount_point);
        self.test_fs_type = String::from(fs_type);
        self.test_binary = String::from(binary);
        self
    }

    /// Set the longest accepted user path
    pub fn with_max_path_len(mut self, len: usize) -> Self {
        self.max_path_len = len;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UserlandConfig::default();
        assert_eq!(config.console_path, "/dev/console");
        assert_eq!(config.boot_device, "virtio0");
        assert_eq!(config.test_binary, "/lku/bin/hello");
    }

    #[test]
    fn test_builders() {
        let config = UserlandConfig::default()
            .with_console_path("/dev/tty")
            .with_test_image("sd0", "/mnt", "ext2", "/mnt/a.out")
            .with_max_path_len(32);
        assert_eq!(config.console_path, "/dev/tty");
        assert_eq!(config.test_mount_point, "/mnt");
        assert_eq!(config.test_fs_type, "ext2");
        assert_eq!(config.max_path_len, 32);
    }
}
