//! Blueprint Forge
//!
//! Turns a tree of markdown blueprints into generated source code in
//! dependency order.
//!
//! ## Features
//!
//! - **Dependency Graph**: `@module.path` references between blueprints form a
//!   petgraph graph; every load error is collected before anything runs
//! - **Cycle Collapse**: strongly connected blueprints are generated together
//!   with mutual context instead of failing the build
//! - **Level Scheduling**: independent blueprints run concurrently under one
//!   bound on in-flight generator calls
//! - **Verify & Repair**: every artifact is checked for structure, declared
//!   elements and import sanity, and failures are fed back for repair
//!
//! ## Pipeline
//!
//! ```text
//! *.md ──discover──▶ BlueprintGraph ──analyze──▶ GenerationPlan
//!                                                    │
//!            RunReport ◀──── Scheduler ◀─────────────┘
//!                              │  per level, per node:
//!                              └─ RepairLoop: generate ▶ verify ▶ repair
//! ```

pub mod config;
pub mod error;
pub mod generate;
pub mod graph;
pub mod interface;
pub mod language;
pub mod manifest;
pub mod report;
pub mod schedule;
pub mod verify;
pub mod writer;

pub use config::ForgeConfig;
pub use error::{ForgeError, GraphBuildError, LanguageError, Result, TransportError};
pub use generate::{CodeGenerator, CommandGenerator, GenerationRequest};
pub use graph::{
    load_project, BlueprintGraph, Diagnostics, GenerationPlan, LoadConfig, ModuleId,
};
pub use interface::ArtifactInterface;
pub use language::Language;
pub use manifest::ProjectManifest;
pub use report::{JsonReporter, Reporter, RunReport, TracingReporter};
pub use schedule::{
    CancellationToken, GenerationResult, GenerationState, Scheduler, SchedulerConfig,
};
pub use verify::{Verifier, VerifyConfig};
pub use writer::{ArtifactWriter, FsArtifactWriter};
