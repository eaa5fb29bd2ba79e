use std::path::Path;

/// Platform-specific operations abstracted behind one interface so call
/// sites stay free of `#[cfg]` blocks.
pub trait Platform {
    /// Build a tokio `Command` that runs an inline shell string.
    fn shell_inline(command: &str) -> tokio::process::Command;

    /// Set owner-only file permissions (0o600 on Unix, no-op on Windows).
    fn restrict_file_permissions_impl(path: &Path);

    /// Command line that reads the system clipboard.
    fn clipboard_read_command() -> (&'static str, Vec<&'static str>);

    /// Command line that writes stdin to the system clipboard.
    fn clipboard_write_command() -> (&'static str, Vec<&'static str>);

    /// Command line that opens an application by name.
    fn open_application_command(app: &str) -> (String, Vec<String>);

    /// One-line OS description for the `system_info` tool.
    fn describe() -> String;
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;

/// Convenience wrapper used across the crate.
pub fn restrict_file_permissions(path: &Path) {
    NativePlatform::restrict_file_permissions_impl(path);
}
