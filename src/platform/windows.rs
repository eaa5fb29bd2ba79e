use std::path::Path;

use super::Platform;

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn shell_inline(command: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }

    fn restrict_file_permissions_impl(_path: &Path) {
        // NTFS ACLs are inherited from the profile directory; nothing to do.
    }

    fn clipboard_read_command() -> (&'static str, Vec<&'static str>) {
        ("powershell", vec!["-NoProfile", "-Command", "Get-Clipboard"])
    }

    fn clipboard_write_command() -> (&'static str, Vec<&'static str>) {
        ("clip", vec![])
    }

    fn open_application_command(app: &str) -> (String, Vec<String>) {
        (
            "cmd".to_string(),
            vec!["/C".to_string(), "start".to_string(), String::new(), app.to_string()],
        )
    }

    fn describe() -> String {
        format!("{} {}", std::env::consts::OS, std::env::consts::ARCH)
    }
}
