//! Custom Resource Definitions for apploy

mod apps;

pub use apps::{
    ApploymentOutcome, ApploymentSpec, ApploymentStatus, Apps, AppsPhase, AppsSpec, AppsStatus,
};
