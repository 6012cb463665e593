//! Task planning and build descriptions for an llbuild-style executor.
//!
//! A [`BuildRequest`] names a [`Workspace`], the targets to build and a run
//! destination. The [`TaskPlanner`] turns it into [`PlannedTask`]s, one
//! target per rayon job, by running [`spec::ToolSpec`]s over each target's
//! sources and resources. [`BuildDescriptionBuilder`] then validates the whole
//! task set (conflicting outputs, ordering hints, cycles) and produces a
//! [`BuildDescription`]: a deterministic JSON manifest for the executor plus
//! a binary form that [`DescriptionCacheManager`] keeps in memory and on
//! disk.
//!
//! Tasks that do not spawn a process run one of the in-process
//! [`TaskAction`]s through [`ExecutableTask::execute`].
#![forbid(unsafe_code)]

pub mod action;
pub mod config;
pub mod context;
mod core;
pub mod description;
pub mod diagnostics;
mod error;
pub mod fs;
mod manager;
pub mod node;
mod planner;
pub mod process;
pub mod propertylist;
pub mod settings;
pub mod spec;
pub mod strings;
pub mod task;
mod utils;
pub mod workspace;

pub use crate::action::{ActionContext, CancellationToken, ClientDelegate, CommandResult, TaskAction};
pub use crate::config::{BuildConfig, EvictionPolicy, FileSystemMode};
pub use crate::core::{Blake3Hasher, Hash32};
pub use crate::description::{BuildDescription, BuildDescriptionBuilder, RetrievalSource};
pub use crate::diagnostics::{Behavior, Diagnostic, OutputDelegate, ScopedDiagnostic};
pub use crate::error::*;
pub use crate::manager::{DescriptionCacheManager, Retrieved};
pub use crate::node::Node;
pub use crate::planner::{PlanResult, TaskPlanner};
pub use crate::task::{ExecutableTask, PlannedTask, TaskBuilder, TaskRef};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
pub use crate::workspace::{BuildRequest, Target, Workspace};
