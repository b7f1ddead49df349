use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

/// What an issuance operation left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueOutcome {
    /// stdout followed by stderr, as far as it was captured.
    pub output: Vec<u8>,
    pub success: bool,
}

impl IssueOutcome {
    pub fn failed(output: impl Into<Vec<u8>>) -> Self {
        Self {
            output: output.into(),
            success: false,
        }
    }

    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Runs a named credential operation. Implementations never fail past this boundary:
/// every problem is folded into an unsuccessful [`IssueOutcome`].
#[async_trait]
pub trait Issuer: Send + Sync {
    async fn issue(&self, operation: &str, args: &[String]) -> IssueOutcome;
}

/// Issues credentials by executing `<scripts_dir>/<operation> args...`.
///
/// Arguments are passed through untouched, so callers must validate them first. There is no
/// timeout: a hung operation blocks its caller until it exits.
#[derive(Debug, Clone)]
pub struct CommandIssuer {
    scripts_dir: PathBuf,
}

impl CommandIssuer {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        let scripts_dir = scripts_dir.into();
        // Operations run with the scripts dir as their cwd, so the program path must not
        // depend on ours.
        let scripts_dir = if scripts_dir.is_relative() {
            std::env::current_dir()
                .map(|cwd| cwd.join(&scripts_dir))
                .unwrap_or(scripts_dir)
        } else {
            scripts_dir
        };
        Self { scripts_dir }
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }
}

#[async_trait]
impl Issuer for CommandIssuer {
    async fn issue(&self, operation: &str, args: &[String]) -> IssueOutcome {
        let program = self.scripts_dir.join(operation);
        let result = Command::new(&program)
            .args(args)
            .current_dir(&self.scripts_dir)
            .stdin(Stdio::null())
            .output()
            .await;

        match result {
            Ok(output) => {
                let mut combined = output.stdout;
                combined.extend_from_slice(&output.stderr);
                if !output.status.success() {
                    tracing::warn!(
                        target: "provisioner.issue",
                        %operation,
                        status = %output.status,
                        "operation exited unsuccessfully",
                    );
                }
                IssueOutcome {
                    output: combined,
                    success: output.status.success(),
                }
            }
            Err(err) => {
                tracing::error!(
                    target: "provisioner.issue",
                    ?err,
                    program = %program.display(),
                    "failed to spawn operation",
                );
                IssueOutcome::failed(format!("failed to spawn {operation}: {err}"))
            }
        }
    }
}
