use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use super::Platform;

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn shell_inline(command: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("bash");
        cmd.arg("-c").arg(command);
        cmd
    }

    fn restrict_file_permissions_impl(path: &Path) {
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }

    fn clipboard_read_command() -> (&'static str, Vec<&'static str>) {
        if cfg!(target_os = "macos") {
            ("pbpaste", vec![])
        } else {
            ("xclip", vec!["-selection", "clipboard", "-o"])
        }
    }

    fn clipboard_write_command() -> (&'static str, Vec<&'static str>) {
        if cfg!(target_os = "macos") {
            ("pbcopy", vec![])
        } else {
            ("xclip", vec!["-selection", "clipboard"])
        }
    }

    fn open_application_command(app: &str) -> (String, Vec<String>) {
        if cfg!(target_os = "macos") {
            ("open".to_string(), vec!["-a".to_string(), app.to_string()])
        } else {
            // Fall back to launching the binary by name on Linux.
            (app.to_string(), vec![])
        }
    }

    fn describe() -> String {
        format!(
            "{} {} ({})",
            std::env::consts::OS,
            std::env::consts::ARCH,
            std::env::consts::FAMILY
        )
    }
}
