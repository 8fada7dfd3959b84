//! Typed App model, positional argument DSL and build session for apploy
//!
//! - [`model`]: the App / Component / Common tree
//! - [`args`]: the `Buildable` capability set and DSL field parsing
//! - [`resource`]: tagged union over every buildable resource kind
//! - [`session`]: the build session state machine
//! - [`script`]: line-oriented build script interpreter

pub mod args;
pub mod error;
pub mod model;
pub mod resource;
pub mod script;
pub mod session;

pub use args::{Buildable, Operation, OperationTable, SENTINEL};
pub use error::{DslError, ScriptError, SessionError};
pub use model::{App, Base, Common, Component, Workload, WorkloadType};
pub use resource::{Resource, ResourceKind};
pub use script::ScriptRunner;
pub use session::{BuildSession, SessionState};
