//! Thin wrapper over `std::process::Command` with a dry-run switch.

use natap_core::PlatformError;
use std::process::{Child, Command, Stdio};
use tracing::{debug, info};

/// Runs system tools. Commands that change host state go through
/// [`CommandRunner::run`] or [`CommandRunner::spawn`] and are only logged in
/// dry-run mode; [`CommandRunner::read`] always executes.
#[derive(Debug, Clone, Copy)]
pub struct CommandRunner {
    dry_run: bool,
}

impl CommandRunner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Execute a state-changing command and wait for it.
    pub fn run(&self, program: &str, args: &[&str]) -> Result<(), PlatformError> {
        if self.dry_run {
            info!(command = %render(program, args), "dry-run: not executing");
            return Ok(());
        }
        debug!(command = %render(program, args), "running");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| PlatformError::Command(format!("failed to run {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlatformError::Command(format!(
                "{} failed: {}",
                render(program, args),
                stderr.trim()
            )));
        }
        Ok(())
    }

    /// Execute a read-only command and return its stdout.
    pub fn read(&self, program: &str, args: &[&str]) -> Result<String, PlatformError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| PlatformError::Command(format!("failed to run {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlatformError::Command(format!(
                "{} failed: {}",
                render(program, args),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Start a long-running child. `None` in dry-run mode.
    pub fn spawn(&self, program: &str, args: &[String]) -> Result<Option<Child>, PlatformError> {
        let shown = args.iter().map(String::as_str).collect::<Vec<_>>();
        if self.dry_run {
            info!(command = %render(program, &shown), "dry-run: not spawning");
            return Ok(None);
        }
        info!(command = %render(program, &shown), "spawning");
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
            .map(Some)
            .map_err(|e| PlatformError::Command(format!("failed to spawn {program}: {e}")))
    }

    /// Write a file that changes host state (sysctl, generated config).
    pub fn write_file(&self, path: &std::path::Path, contents: &str) -> Result<(), PlatformError> {
        if self.dry_run {
            info!(path = %path.display(), contents, "dry-run: not writing");
            return Ok(());
        }
        std::fs::write(path, contents)
            .map_err(|e| PlatformError::Command(format!("cannot write {}: {e}", path.display())))
    }
}

fn render(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_skips_writes() {
        let runner = CommandRunner::new(true);
        assert!(runner.run("definitely-not-a-real-binary", &["-x"]).is_ok());
        assert!(runner
            .spawn("definitely-not-a-real-binary", &["-x".to_string()])
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_missing_binary_is_command_error() {
        let runner = CommandRunner::new(false);
        let err = runner.read("definitely-not-a-real-binary", &[]).unwrap_err();
        assert!(matches!(err, PlatformError::Command(_)));
    }

    #[test]
    fn test_dry_run_write_file_leaves_disk_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostapd.conf");
        CommandRunner::new(true).write_file(&path, "ssid=x\n").unwrap();
        assert!(!path.exists());

        CommandRunner::new(false).write_file(&path, "ssid=x\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "ssid=x\n");
    }

    #[test]
    fn test_render() {
        assert_eq!(render("ip", &["link", "show"]), "ip link show");
        assert_eq!(render("true", &[]), "true");
    }
}
