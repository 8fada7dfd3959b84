//! Error types for DSL parsing, build sessions and build scripts

use crate::model::WorkloadType;
use crate::resource::ResourceKind;
use crate::session::SessionState;

/// A rejected DSL invocation. Nothing on the receiver was changed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DslError {
    #[error("invalid args: expected {expected} fields, got {got}; required pattern: {example}")]
    ArgCount {
        expected: usize,
        got: usize,
        example: String,
    },

    #[error("invalid value '{value}' for field '{field}': {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("invalid integer '{value}' for field '{field}'")]
    InvalidInteger { field: String, value: String },

    #[error("invalid encoding '{value}' for field '{field}': expected key:value[;key:value...]")]
    InvalidEncoding { field: String, value: String },
}

/// A rejected build session transition. The session state is unchanged.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("cannot {action} while session is {state}")]
    InvalidTransition {
        action: &'static str,
        state: SessionState,
    },

    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("app version must not be empty")]
    MissingVersion,

    #[error("component '{component}' is a {declared}, cannot build a {requested} file in it")]
    WorkloadMismatch {
        component: String,
        declared: WorkloadType,
        requested: ResourceKind,
    },

    #[error("component '{component}' has no workload yet; build its {declared} file first")]
    MissingWorkload {
        component: String,
        declared: WorkloadType,
    },

    #[error("{kind} slot already holds '{existing}', cannot open '{requested}'")]
    SlotOccupied {
        kind: ResourceKind,
        existing: String,
        requested: String,
    },

    #[error("{kind} files can only be built inside a component")]
    ComponentScopeOnly { kind: ResourceKind },

    #[error(transparent)]
    Args(#[from] DslError),

    #[error("generating app failed: {0}")]
    Generate(String),
}

/// A failed build script command
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("{command}: expected {expected}")]
    Usage {
        command: &'static str,
        expected: &'static str,
    },

    #[error("no app started; begin with 'app <name> <version>'")]
    NoSession,

    #[error("an app is already being built")]
    AlreadyStarted,

    #[error("invalid {what} '{token}': {reason}")]
    InvalidKind {
        what: &'static str,
        token: String,
        reason: String,
    },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("line {line}: {source}")]
    AtLine {
        line: usize,
        #[source]
        source: Box<ScriptError>,
    },
}

impl From<DslError> for ScriptError {
    fn from(e: DslError) -> Self {
        Self::Session(SessionError::Args(e))
    }
}
