//! Build session state machine
//!
//! A [`BuildSession`] sequences construction of an [`App`]: app fields, then
//! components, then one resource file at a time inside a component (or at app
//! scope for shared resources). The tree is only handed to a generator once
//! the app is closed.
//!
//! ```text
//! AppBuilding ──begin_component──▶ ComponentBuilding ──begin_file──▶ FileBuilding
//!      ▲                                 ▲    │                          │ parse_args ok
//!      │                      finish_file│    │close_component           ▼
//!      └───────── ComponentBuilt ◀───────┼────┘                      FileBuilt
//!                      │                 └───────────────────────────────┘
//!                 close_app
//!                      ▼
//!                  AppBuilt ──generate──▶ AppGenerated | AppGenerateFailed ──retry──▶ AppBuilt
//! ```

use std::fmt;

use tracing::{debug, warn};

use crate::args::{validate_dns_label, Buildable, OperationTable};
use crate::error::SessionError;
use crate::model::{App, Component, WorkloadType};
use crate::resource::{Resource, ResourceKind};

/// Position of a session in the build sequence
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    AppBuilding,
    ComponentBuilding,
    FileBuilding,
    FileBuilt,
    ComponentBuilt,
    AppBuilt,
    AppGenerateFailed,
    AppGenerated,
    Abandoned,
}

impl SessionState {
    /// No transition leaves a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AppGenerated | Self::Abandoned)
    }

    /// States in which app-scope commands are accepted
    fn at_app_scope(&self) -> bool {
        matches!(self, Self::AppBuilding | Self::ComponentBuilt)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AppBuilding => "AppBuilding",
            Self::ComponentBuilding => "ComponentBuilding",
            Self::FileBuilding => "FileBuilding",
            Self::FileBuilt => "FileBuilt",
            Self::ComponentBuilt => "ComponentBuilt",
            Self::AppBuilt => "AppBuilt",
            Self::AppGenerateFailed => "AppGenerateFailed",
            Self::AppGenerated => "AppGenerated",
            Self::Abandoned => "Abandoned",
        };
        f.write_str(s)
    }
}

/// Resource file currently being edited
#[derive(Clone, Debug)]
struct OpenFile {
    /// Staged copy; written into the tree after each successful parse
    resource: Resource,
    /// Owning component, `None` for app-scope files
    component: Option<usize>,
}

/// Incremental builder for one [`App`]
#[derive(Clone, Debug)]
pub struct BuildSession {
    app: App,
    state: SessionState,
    component: Option<usize>,
    file: Option<OpenFile>,
}

impl BuildSession {
    /// Start a session for a new app. Name and version are required.
    pub fn start(name: &str, version: &str) -> Result<Self, SessionError> {
        check_name(name)?;
        if version.trim().is_empty() {
            return Err(SessionError::MissingVersion);
        }
        debug!(app = %name, version = %version, "build session started");
        Ok(Self {
            app: App::new(name, version),
            state: SessionState::AppBuilding,
            component: None,
            file: None,
        })
    }

    /// Resume editing an existing app tree
    pub fn resume(app: App) -> Result<Self, SessionError> {
        check_name(app.name())?;
        if app.version.trim().is_empty() {
            return Err(SessionError::MissingVersion);
        }
        Ok(Self {
            app,
            state: SessionState::AppBuilding,
            component: None,
            file: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    /// Consume the session, returning the tree built so far
    pub fn into_app(self) -> App {
        self.app
    }

    /// Name of the component being built
    pub fn active_component(&self) -> Option<&str> {
        self.component
            .and_then(|i| self.app.components.get(i))
            .map(Component::name)
    }

    /// Kind and name of the open file
    pub fn open_file(&self) -> Option<(ResourceKind, &str)> {
        self.file
            .as_ref()
            .map(|f| (f.resource.kind(), f.resource.name()))
    }

    /// Argument example for whatever `parse_args` currently targets
    pub fn args_example(&self) -> Option<&'static str> {
        match self.state {
            SessionState::FileBuilding | SessionState::FileBuilt => {
                self.file.as_ref().map(|f| f.resource.args_example())
            }
            SessionState::ComponentBuilding => self.current_component().map(|c| c.args_example()),
            s if s.at_app_scope() => Some(self.app.args_example()),
            _ => None,
        }
    }

    /// Operations supported by whatever `parse_args` currently targets
    pub fn available_operations(&self) -> Option<OperationTable> {
        match self.state {
            SessionState::FileBuilding | SessionState::FileBuilt => {
                self.file.as_ref().map(|f| f.resource.available_operations())
            }
            SessionState::ComponentBuilding => {
                self.current_component().map(|c| c.available_operations())
            }
            s if s.at_app_scope() => Some(self.app.available_operations()),
            _ => None,
        }
    }

    /// Apply a DSL string to the app, the active component, or the open file.
    ///
    /// A failure leaves both the tree and the state untouched.
    pub fn parse_args(&mut self, input: &str) -> Result<(), SessionError> {
        match self.state {
            s if s.at_app_scope() => {
                self.app.parse_args(input)?;
                self.transition(SessionState::AppBuilding);
            }
            SessionState::ComponentBuilding => {
                let idx = self.component_index("parse_args")?;
                self.app.components[idx].parse_args(input)?;
            }
            SessionState::FileBuilding | SessionState::FileBuilt => {
                let file = self
                    .file
                    .as_mut()
                    .ok_or_else(|| invalid("parse_args", self.state))?;
                file.resource.parse_args(input)?;
                let staged = file.resource.clone();
                let component = file.component;
                self.commit(component, staged);
                self.transition(SessionState::FileBuilt);
            }
            state => return Err(invalid("parse_args", state)),
        }
        Ok(())
    }

    /// Open (or reopen) a component. Reopening requires the same workload type.
    pub fn begin_component(
        &mut self,
        name: &str,
        workload_type: WorkloadType,
    ) -> Result<(), SessionError> {
        if !self.state.at_app_scope() {
            return Err(invalid("begin component", self.state));
        }
        check_name(name)?;

        let idx = match self.app.component_index(name) {
            Some(idx) => {
                let declared = self.app.components[idx].workload_type;
                if declared != workload_type {
                    return Err(SessionError::WorkloadMismatch {
                        component: name.to_string(),
                        declared,
                        requested: workload_type.into(),
                    });
                }
                idx
            }
            None => {
                self.app
                    .components
                    .push(Component::new(name, workload_type));
                self.app.components.len() - 1
            }
        };

        self.component = Some(idx);
        self.transition(SessionState::ComponentBuilding);
        Ok(())
    }

    /// Open a resource file in the active component, or at app scope when no
    /// component is active. Starting a file from `FileBuilt` closes the
    /// previous one.
    pub fn begin_file(&mut self, kind: ResourceKind, name: &str) -> Result<(), SessionError> {
        let scope = match self.state {
            SessionState::ComponentBuilding => self.component,
            SessionState::FileBuilt => self.file.as_ref().and_then(|f| f.component),
            s if s.at_app_scope() => None,
            state => return Err(invalid("begin file", state)),
        };
        check_name(name)?;

        let staged = match scope {
            Some(idx) => self.stage_in_component(idx, kind, name)?,
            None => self.stage_in_app(kind, name)?,
        };

        self.file = Some(OpenFile {
            resource: staged,
            component: scope,
        });
        self.component = scope;
        self.transition(SessionState::FileBuilding);
        Ok(())
    }

    /// Close a successfully parsed file
    pub fn finish_file(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::FileBuilt {
            return Err(invalid("finish file", self.state));
        }
        self.leave_file();
        Ok(())
    }

    /// Drop an open file that was never parsed successfully
    pub fn discard_file(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::FileBuilding {
            return Err(invalid("discard file", self.state));
        }
        self.leave_file();
        Ok(())
    }

    /// Close the active component, finishing its open file if it was parsed
    pub fn close_component(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::ComponentBuilding => {}
            SessionState::FileBuilt if self.file.as_ref().is_some_and(|f| f.component.is_some()) => {
                self.file = None;
            }
            state => return Err(invalid("close component", state)),
        }
        self.component = None;
        self.transition(SessionState::ComponentBuilt);
        Ok(())
    }

    /// Close the app; the tree becomes ready to generate
    pub fn close_app(&mut self) -> Result<(), SessionError> {
        if !self.state.at_app_scope() {
            return Err(invalid("close app", self.state));
        }
        if self.app.version.trim().is_empty() {
            return Err(SessionError::MissingVersion);
        }
        self.transition(SessionState::AppBuilt);
        Ok(())
    }

    /// Close the innermost open scope: file, then component, then app
    pub fn close(&mut self) -> Result<SessionState, SessionError> {
        match self.state {
            SessionState::FileBuilding => self.discard_file()?,
            SessionState::FileBuilt => self.finish_file()?,
            SessionState::ComponentBuilding => self.close_component()?,
            s if s.at_app_scope() => self.close_app()?,
            state => return Err(invalid("close", state)),
        }
        Ok(self.state)
    }

    /// Run `generate` (compile and persist) over the closed app.
    ///
    /// Success ends the session in `AppGenerated`; failure moves it to
    /// `AppGenerateFailed` from where it can be retried or abandoned.
    pub fn generate<T, E, F>(&mut self, generate: F) -> Result<T, SessionError>
    where
        F: FnOnce(&App) -> Result<T, E>,
        E: fmt::Display,
    {
        if self.state != SessionState::AppBuilt {
            return Err(invalid("generate", self.state));
        }
        match generate(&self.app) {
            Ok(out) => {
                self.transition(SessionState::AppGenerated);
                Ok(out)
            }
            Err(e) => {
                self.transition(SessionState::AppGenerateFailed);
                Err(SessionError::Generate(e.to_string()))
            }
        }
    }

    /// Return to `AppBuilt` after a failed generation
    pub fn retry(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::AppGenerateFailed {
            return Err(invalid("retry", self.state));
        }
        self.transition(SessionState::AppBuilt);
        Ok(())
    }

    /// Give up on the build. Terminal.
    pub fn abandon(&mut self) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            return Err(invalid("abandon", self.state));
        }
        self.file = None;
        self.component = None;
        self.transition(SessionState::Abandoned);
        Ok(())
    }

    fn transition(&mut self, to: SessionState) {
        if self.state != to {
            debug!(app = %self.app.name(), from = %self.state, to = %to, "session transition");
            self.state = to;
        }
    }

    fn current_component(&self) -> Option<&Component> {
        self.component.and_then(|i| self.app.components.get(i))
    }

    fn component_index(&self, action: &'static str) -> Result<usize, SessionError> {
        self.component
            .filter(|i| *i < self.app.components.len())
            .ok_or_else(|| invalid(action, self.state))
    }

    fn leave_file(&mut self) {
        let scope = self.file.take().and_then(|f| f.component);
        self.component = scope;
        match scope {
            Some(_) => self.transition(SessionState::ComponentBuilding),
            None => self.transition(SessionState::AppBuilding),
        }
    }

    fn stage_in_component(
        &self,
        idx: usize,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Resource, SessionError> {
        let component = &self.app.components[idx];

        if let Some(requested) = kind.workload_type() {
            if requested != component.workload_type {
                return Err(SessionError::WorkloadMismatch {
                    component: component.name().to_string(),
                    declared: component.workload_type,
                    requested: kind,
                });
            }
            return match &component.workload {
                Some(w) if w.base().name == name => Ok(Resource::from_workload(w.clone())),
                Some(w) => Err(SessionError::SlotOccupied {
                    kind,
                    existing: w.base().name.clone(),
                    requested: name.to_string(),
                }),
                None => Ok(Resource::new(kind, name)),
            };
        }

        if kind == ResourceKind::Container {
            let Some(workload) = &component.workload else {
                return Err(SessionError::MissingWorkload {
                    component: component.name().to_string(),
                    declared: component.workload_type,
                });
            };
            return Ok(workload
                .template()
                .container(name)
                .cloned()
                .map(Resource::Container)
                .unwrap_or_else(|| Resource::new(kind, name)));
        }

        stage_common(&component.common, kind, name)
    }

    fn stage_in_app(&self, kind: ResourceKind, name: &str) -> Result<Resource, SessionError> {
        if kind.is_component_scoped() {
            return Err(SessionError::ComponentScopeOnly { kind });
        }
        stage_common(&self.app.common, kind, name)
    }

    fn commit(&mut self, component: Option<usize>, resource: Resource) {
        let Some(idx) = component else {
            // stage_in_app rejects component-scoped kinds
            if let Err(rejected) = self.app.common.put(resource) {
                warn!(kind = ?rejected.kind(), name = %rejected.name(), "no app-scope slot, resource dropped");
            }
            return;
        };
        let component = &mut self.app.components[idx];
        match resource.into_workload() {
            Ok(workload) => component.workload = Some(workload),
            Err(Resource::Container(container)) => match component.workload.as_mut() {
                Some(workload) => workload.template_mut().upsert(container),
                None => warn!(container = %container.name, "no workload to hold container, dropped"),
            },
            Err(other) => {
                if let Err(rejected) = component.common.put(other) {
                    warn!(kind = ?rejected.kind(), name = %rejected.name(), "no component slot, resource dropped");
                }
            }
        }
    }
}

fn stage_common(
    common: &crate::model::Common,
    kind: ResourceKind,
    name: &str,
) -> Result<Resource, SessionError> {
    if let Some(existing) = common.get(kind, name) {
        return Ok(existing);
    }
    if kind.is_singleton() {
        if let Some(existing) = common.occupant(kind) {
            return Err(SessionError::SlotOccupied {
                kind,
                existing: existing.to_string(),
                requested: name.to_string(),
            });
        }
    }
    Ok(Resource::new(kind, name))
}

fn check_name(name: &str) -> Result<(), SessionError> {
    validate_dns_label(name).map_err(|reason| SessionError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

fn invalid(action: &'static str, state: SessionState) -> SessionError {
    SessionError::InvalidTransition { action, state }
}
