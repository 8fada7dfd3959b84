//! Line-oriented build scripts
//!
//! ```text
//! app shop 1.0.0
//! args team:payments shop-prod
//! component db statefulset
//! file statefulset db
//! args tier:db _ 3 RollingUpdate OrderedReady 10 _
//! close
//! close
//! close
//! ```
//!
//! Each line drives one [`BuildSession`] transition. `#` starts a comment
//! line; blank lines are skipped.

use std::str::FromStr;

use crate::error::ScriptError;
use crate::model::WorkloadType;
use crate::resource::ResourceKind;
use crate::session::{BuildSession, SessionState};

/// Interprets build script commands against a single session
#[derive(Debug, Default)]
pub struct ScriptRunner {
    session: Option<BuildSession>,
}

impl ScriptRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&BuildSession> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut BuildSession> {
        self.session.as_mut()
    }

    pub fn into_session(self) -> Option<BuildSession> {
        self.session
    }

    /// Execute a single line. Returns the resulting state, or `None` when the
    /// line was blank or a comment.
    pub fn execute(&mut self, line: &str) -> Result<Option<SessionState>, ScriptError> {
        let line = line.trim_end();
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }

        let (command, rest) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
        match command {
            "app" => {
                if self.session.is_some() {
                    return Err(ScriptError::AlreadyStarted);
                }
                let [name, version] = words::<2>(rest).ok_or(ScriptError::Usage {
                    command: "app",
                    expected: "app <name> <version>",
                })?;
                self.session = Some(BuildSession::start(name, version)?);
            }
            "args" => {
                if rest.is_empty() {
                    return Err(ScriptError::Usage {
                        command: "args",
                        expected: "args <fields...>",
                    });
                }
                self.active()?.parse_args(rest)?;
            }
            "component" => {
                let [name, kind] = words::<2>(rest).ok_or(ScriptError::Usage {
                    command: "component",
                    expected: "component <name> <workload-type>",
                })?;
                let workload_type = parse_kind::<WorkloadType>("workload type", kind)?;
                self.active()?.begin_component(name, workload_type)?;
            }
            "file" => {
                let [kind, name] = words::<2>(rest).ok_or(ScriptError::Usage {
                    command: "file",
                    expected: "file <kind> <name>",
                })?;
                let kind = parse_kind::<ResourceKind>("resource kind", kind)?;
                self.active()?.begin_file(kind, name)?;
            }
            "close" => {
                if !rest.is_empty() {
                    return Err(ScriptError::Usage {
                        command: "close",
                        expected: "close",
                    });
                }
                self.active()?.close()?;
            }
            other => return Err(ScriptError::UnknownCommand(other.to_string())),
        }

        Ok(self.session.as_ref().map(BuildSession::state))
    }

    /// Run a whole script, stopping at the first failing line
    pub fn run_script(&mut self, source: &str) -> Result<(), ScriptError> {
        for (idx, line) in source.lines().enumerate() {
            self.execute(line).map_err(|e| ScriptError::AtLine {
                line: idx + 1,
                source: Box::new(e),
            })?;
        }
        Ok(())
    }

    fn active(&mut self) -> Result<&mut BuildSession, ScriptError> {
        self.session.as_mut().ok_or(ScriptError::NoSession)
    }
}

fn words<const N: usize>(rest: &str) -> Option<[&str; N]> {
    let parts: Vec<&str> = rest.split_whitespace().collect();
    parts.try_into().ok()
}

fn parse_kind<T>(what: &'static str, token: &str) -> Result<T, ScriptError>
where
    T: FromStr<Err = String>,
{
    token.parse().map_err(|reason| ScriptError::InvalidKind {
        what,
        token: token.to_string(),
        reason,
    })
}
