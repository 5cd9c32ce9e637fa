//! Workflow Planning Module
//!
//! Data structures and utilities for describing a workflow as a DAG of
//! jobs and nested sub-workflows, and for emitting it as a DAG description
//! plus file catalogs.
//!
//! # Structure
//!
//! - [`artifact`]: File identities and logical file names
//! - [`registry`]: Artifact producers, consumers and seed resolution
//! - [`node`]: Executables and job nodes
//! - [`subworkflow`]: Nodes that run a whole nested workflow
//! - [`graph`]: The DAG, its edges and validation
//! - [`catalog`]: Logical-to-physical file catalogs
//! - [`planner`]: Emission of DAG descriptions and catalogs
//! - [`parser`]: YAML workflow definitions

pub mod artifact;
pub mod catalog;
pub mod config;
pub mod error;
pub mod graph;
pub mod node;
pub mod parser;
pub mod planner;
pub mod registry;
pub mod subworkflow;

pub use artifact::{Artifact, Persistence, Retention, Segment};
pub use catalog::{CatalogEntry, FileCatalog};
pub use config::{PlanConfig, StagingPolicy};
pub use error::{PlanError, Result};
pub use graph::{EdgeKind, GraphState, WorkflowGraph};
pub use node::{Executable, Node, NodeId, NodeKind, OptionBinding, OptionValue};
pub use parser::{load_definition, BuiltWorkflow, Definition};
pub use planner::Emission;
pub use registry::{ArtifactRecord, ArtifactRegistry, Origin};
pub use subworkflow::{BoundaryOutput, SubWorkflow, SubWorkflowSpec};
