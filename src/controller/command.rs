//! Host Command Runner
//!
//! Runs host tools (`iscsiadm`, `mdadm`), optionally through a wrapper such
//! as `nsenter --net=/host/proc/1/ns/net` when the controller runs inside a
//! container.

use crate::error::{Error, Result};
use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (`None` when killed by a signal)
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A host tool invocation prefix: program followed by fixed arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    argv: Vec<String>,
}

impl HostCommand {
    /// Build from a program and wrapper arguments
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.is_empty() || argv[0].is_empty() {
            return Err(Error::Configuration("empty command line".into()));
        }
        Ok(Self { argv })
    }

    /// Parse a whitespace-separated command line (`"nsenter --mount=... mdadm"`)
    pub fn parse(line: &str) -> Result<Self> {
        Self::new(line.split_whitespace().map(String::from).collect())
    }

    /// Name of the wrapped tool, used in error reports
    pub fn tool(&self) -> &str {
        self.argv.last().map(String::as_str).unwrap_or_default()
    }

    /// Run with extra arguments and capture output regardless of exit status
    pub async fn output(&self, args: &[&str]) -> Result<CommandOutput> {
        debug!("exec: {} {}", self.argv.join(" "), args.join(" "));

        let output = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Command {
                command: self.describe(args),
                reason: e.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run with extra arguments; a non-zero exit is an error
    pub async fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.output(args).await?;
        if !output.success() {
            return Err(self.failure(args, &output));
        }
        Ok(output)
    }

    /// Build the error for a failed invocation
    pub fn failure(&self, args: &[&str], output: &CommandOutput) -> Error {
        let reason = match output.stderr.trim() {
            "" => format!("exit status {:?}", output.code),
            stderr => stderr.to_string(),
        };
        Error::Command {
            command: self.describe(args),
            reason,
        }
    }

    fn describe(&self, args: &[&str]) -> String {
        let mut line = self.tool().to_string();
        for arg in args.iter().take(2) {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_wrapper() {
        let cmd = HostCommand::parse("nsenter --net=/host/proc/1/ns/net iscsiadm").unwrap();
        assert_eq!(cmd.tool(), "iscsiadm");
        assert!(HostCommand::parse("   ").is_err());
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let cmd = HostCommand::parse("echo").unwrap();
        let output = cmd.run(&["hello"]).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_reports_failure() {
        let cmd = HostCommand::parse("false").unwrap();
        let err = cmd.run(&[]).await.unwrap_err();
        assert_matches!(err, Error::Command { command, .. } if command == "false");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let cmd = HostCommand::parse("mirrorvol-no-such-tool").unwrap();
        assert_matches!(cmd.output(&[]).await, Err(Error::Command { .. }));
    }
}
