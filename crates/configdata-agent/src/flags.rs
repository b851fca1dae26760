//! # Runtime CLI Flags
//!
//! Global options for the container runtime binary a consumer is launched
//! with, turned into POSIX long flags.
//!
//! The mapping from config field to flag name is the static [`FLAG_TABLE`].
//! [`build_flags`] walks it in order:
//!
//! | Field value | Flag |
//! |---|---|
//! | `true` switch | `--name` |
//! | `false` switch | omitted |
//! | `Some(text)` | `--name=text` |
//! | `None` | omitted |
//! | non-empty list | `--name=a,b,c` |
//! | empty list | omitted |

use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeCliConfig {
    pub debug: bool,
    pub dir: Option<String>,
    pub local_config_dir: Option<String>,
    pub user_config_dir: Option<String>,
    pub system_config_dir: Option<String>,
    pub insecure_options: Vec<String>,
}

/// A field of [`RuntimeCliConfig`] that has a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliField {
    Debug,
    Dir,
    LocalConfigDir,
    UserConfigDir,
    SystemConfigDir,
    InsecureOptions,
}

/// Field → flag name, in emission order.
pub const FLAG_TABLE: &[(CliField, &str)] = &[
    (CliField::Debug, "debug"),
    (CliField::Dir, "dir"),
    (CliField::LocalConfigDir, "local-config"),
    (CliField::UserConfigDir, "user-config"),
    (CliField::SystemConfigDir, "system-config"),
    (CliField::InsecureOptions, "insecure-options"),
];

enum FlagValue<'a> {
    Switch(bool),
    Text(Option<&'a str>),
    List(&'a [String]),
}

impl RuntimeCliConfig {
    fn value(&self, field: CliField) -> FlagValue<'_> {
        match field {
            CliField::Debug => FlagValue::Switch(self.debug),
            CliField::Dir => FlagValue::Text(self.dir.as_deref()),
            CliField::LocalConfigDir => FlagValue::Text(self.local_config_dir.as_deref()),
            CliField::UserConfigDir => FlagValue::Text(self.user_config_dir.as_deref()),
            CliField::SystemConfigDir => FlagValue::Text(self.system_config_dir.as_deref()),
            CliField::InsecureOptions => FlagValue::List(&self.insecure_options),
        }
    }

    /// Overrides every field that is set in `other`.
    pub fn merge(&mut self, other: &RuntimeCliConfig) {
        if other.debug {
            self.debug = true;
        }
        for (target, value) in [
            (&mut self.dir, &other.dir),
            (&mut self.local_config_dir, &other.local_config_dir),
            (&mut self.user_config_dir, &other.user_config_dir),
            (&mut self.system_config_dir, &other.system_config_dir),
        ] {
            if value.is_some() {
                target.clone_from(value);
            }
        }
        if !other.insecure_options.is_empty() {
            self.insecure_options.clone_from(&other.insecure_options);
        }
    }
}

pub fn build_flags(config: &RuntimeCliConfig) -> Vec<String> {
    FLAG_TABLE
        .iter()
        .filter_map(|(field, flag)| match config.value(*field) {
            FlagValue::Switch(true) => Some(format!("--{flag}")),
            FlagValue::Switch(false) | FlagValue::Text(None) => None,
            FlagValue::Text(Some(text)) => Some(format!("--{flag}={text}")),
            FlagValue::List([]) => None,
            FlagValue::List(items) => Some(format!("--{flag}={}", items.join(","))),
        })
        .collect()
}

/// A runtime binary plus the global flags every invocation carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCli {
    program: PathBuf,
    config: RuntimeCliConfig,
}

impl RuntimeCli {
    pub fn new(program: impl Into<PathBuf>, config: RuntimeCliConfig) -> Self {
        Self {
            program: program.into(),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeCliConfig {
        &self.config
    }

    /// A copy with `overrides` merged over the current config.
    pub fn with(&self, overrides: &RuntimeCliConfig) -> Self {
        let mut config = self.config.clone();
        config.merge(overrides);
        Self {
            program: self.program.clone(),
            config,
        }
    }

    /// Arguments after the program name: subcommand, global flags, then `args`.
    pub fn command_line(&self, subcommand: &str, args: &[&str]) -> Vec<String> {
        std::iter::once(subcommand.to_string())
            .chain(build_flags(&self.config))
            .chain(args.iter().map(|a| a.to_string()))
            .collect()
    }

    /// Runs the binary and returns its trimmed stdout split into lines.
    pub async fn run_command(&self, subcommand: &str, args: &[&str]) -> Result<Vec<String>, AgentError> {
        let argv = self.command_line(subcommand, args);
        let program = self.program.display().to_string();
        debug!(%program, ?argv, "Running command");

        let output = tokio::process::Command::new(&self.program)
            .args(&argv)
            .output()
            .await
            .map_err(|e| AgentError::Command {
                program: program.clone(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(AgentError::Command {
                program,
                reason: format!(
                    "{} (args {:?})\nstdout: {}\nstderr: {}",
                    output.status,
                    argv,
                    stdout,
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }
        Ok(stdout.trim().lines().map(str::to_string).collect())
    }
}
