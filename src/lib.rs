//! DagPlan - Workflow Planner with Nested Sub-Workflows
//!
//! Builds multi-stage analysis pipelines as a directed acyclic graph of
//! jobs, where a node may itself run a whole sub-workflow, and emits the
//! result as a DAG description plus file catalogs for an external
//! scheduler. Nothing is executed here.
//!
//! # Architecture
//!
//! Everything lives under [`workflow`]:
//!
//! - artifacts and the registry that links producers to consumers
//! - job nodes and sub-workflow nodes
//! - the graph itself, its validation and emission
//! - YAML workflow definitions
//!
//! # Example
//!
//! ```rust,no_run
//! use dagplan::workflow::{Executable, Segment};
//! use dagplan::WorkflowGraph;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut graph = WorkflowGraph::new("inference");
//!     let segment = Segment::new(1000, 1100);
//!
//!     let sampler = Executable::new("sampler", "/usr/bin/sampler", "H1L1", "samples");
//!     let mut job = sampler.create_node();
//!     let samples = job.new_output_file_opt(segment, ".hdf", "--output-file", &["A"]);
//!     graph.add(job)?;
//!
//!     let plotter = Executable::new("plotter", "/usr/bin/plotter", "H1L1", "plots");
//!     let mut plot = plotter.create_node();
//!     plot.add_input_opt("--input-file", &samples);
//!     graph.add(plot)?;
//!
//!     let emission = graph.save()?;
//!     println!("wrote {}", emission.dag_path.display());
//!     Ok(())
//! }
//! ```

pub mod workflow;

// Re-export commonly used types
pub use workflow::error::{PlanError, Result};
pub use workflow::graph::WorkflowGraph;
pub use workflow::parser::{load_definition, Definition};
pub use workflow::subworkflow::SubWorkflow;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "DagPlan";
