//! Sub-Workflow Nodes
//!
//! A sub-workflow is a node whose body is a whole workflow, generated by
//! another job of the parent graph. The parent never looks inside it: it
//! only knows the DAG description and catalog map the generating job
//! writes, plus the boundary artifacts declared here.
//!
//! # Example
//!
//! ```
//! use dagplan::workflow::{Artifact, Executable, Segment, SubWorkflow, WorkflowGraph};
//!
//! fn main() -> Result<(), dagplan::PlanError> {
//!     let mut graph = WorkflowGraph::new("parent");
//!
//!     let gen = Executable::new("make_subdag", "/usr/bin/make_subdag", "H1", "sub");
//!     let mut job = gen.create_node();
//!     let seg = Segment::new(0, 100);
//!     let dag = job.new_output_file_opt(seg, ".dag.yml", "--output-dag", &["a"]);
//!     let map = job.new_output_file_opt(seg, ".map", "--output-map", &["a"]);
//!     let posterior = Artifact::new("H1", "inference", seg, ".hdf", "results");
//!     job.add_opt("--posterior-name", posterior.lfn());
//!     graph.add(job)?;
//!
//!     let mut sub = SubWorkflow::new("inference_a", &dag);
//!     sub.set_subworkflow_properties(&map, "local", "inference_a.cache");
//!     sub.add_outputs(&[&posterior], true);
//!     let id = sub.add_into_workflow(&mut graph)?;
//!
//!     assert!(graph.node(&id).is_some_and(|n| n.is_subworkflow()));
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

use log::debug;

use super::artifact::Artifact;
use super::error::Result;
use super::graph::WorkflowGraph;
use super::node::{Node, NodeId, NodeKind};

/// A boundary output and whether it is copied out after the sub-workflow ends.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryOutput {
    pub artifact: Artifact,
    pub stage_out: bool,
}

/// Everything the parent graph knows about a sub-workflow.
#[derive(Debug, Clone)]
pub struct SubWorkflowSpec {
    /// DAG description written by the generating job
    pub dag_file: Artifact,
    /// Catalog map written by the generating job
    pub catalog_map: Option<Artifact>,
    pub staging_site: Option<String>,
    /// Reuse catalog handed to the sub-workflow's planner
    pub cache_file: Option<PathBuf>,
    pub boundary_inputs: Vec<Artifact>,
    pub boundary_outputs: Vec<BoundaryOutput>,
}

impl SubWorkflowSpec {
    /// Looks up a boundary output by LFN.
    pub fn boundary_output(&self, lfn: &str) -> Option<&BoundaryOutput> {
        self.boundary_outputs.iter().find(|o| o.artifact.lfn() == lfn)
    }

    /// True if `lfn` is a boundary output marked for stage-out.
    pub fn stages_out(&self, lfn: &str) -> bool {
        self.boundary_output(lfn).is_some_and(|o| o.stage_out)
    }
}

/// Builder for a sub-workflow node.
#[derive(Debug, Clone)]
pub struct SubWorkflow {
    node: Node,
    spec: SubWorkflowSpec,
}

impl SubWorkflow {
    /// Creates a sub-workflow running the DAG description `dag_file`.
    pub fn new(name: impl Into<String>, dag_file: &Artifact) -> Self {
        let mut node = Node::bare(name);
        node.add_input(dag_file);

        Self {
            node,
            spec: SubWorkflowSpec {
                dag_file: dag_file.clone(),
                catalog_map: None,
                staging_site: None,
                cache_file: None,
                boundary_inputs: Vec::new(),
                boundary_outputs: Vec::new(),
            },
        }
    }

    /// Attaches the catalog map, staging site and reuse cache file.
    pub fn set_subworkflow_properties(
        &mut self,
        catalog_map: &Artifact,
        staging_site: impl Into<String>,
        cache_file: impl Into<PathBuf>,
    ) {
        self.node.add_input(catalog_map);
        self.spec.catalog_map = Some(catalog_map.clone());
        self.spec.staging_site = Some(staging_site.into());
        self.spec.cache_file = Some(cache_file.into());
    }

    /// Adds an argument passed to the sub-workflow's planner.
    pub fn add_planner_arg(&mut self, flag: impl Into<String>, value: impl Into<String>) {
        self.node.add_opt(flag, value);
    }

    /// Declares artifacts the sub-workflow reads but does not produce.
    pub fn add_inputs(&mut self, artifacts: &[&Artifact]) {
        for artifact in artifacts {
            let lfn = artifact.lfn();
            if !self.spec.boundary_inputs.iter().any(|a| a.lfn() == lfn) {
                self.spec.boundary_inputs.push((*artifact).clone());
            }
            self.node.add_input(artifact);
        }
    }

    /// Declares artifacts the sub-workflow produces for the outside world.
    ///
    /// With `stage_out` the artifacts become persistent and are copied out
    /// of the sub-workflow's working area once it completes.
    pub fn add_outputs(&mut self, artifacts: &[&Artifact], stage_out: bool) {
        for artifact in artifacts {
            let artifact = if stage_out {
                (*artifact).clone().persistent()
            } else {
                (*artifact).clone()
            };
            let lfn = artifact.lfn();

            match self
                .spec
                .boundary_outputs
                .iter_mut()
                .find(|o| o.artifact.lfn() == lfn)
            {
                Some(existing) => {
                    existing.stage_out |= stage_out;
                    if stage_out {
                        existing.artifact = artifact.clone();
                    }
                }
                None => self.spec.boundary_outputs.push(BoundaryOutput {
                    artifact: artifact.clone(),
                    stage_out,
                }),
            }
            self.node.add_output(&artifact);
        }
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub fn spec(&self) -> &SubWorkflowSpec {
        &self.spec
    }

    /// Turns the builder into a graph node.
    pub fn into_node(self) -> Node {
        let mut node = self.node;
        node.kind = NodeKind::SubWorkflow(self.spec);
        node
    }

    /// Inserts the sub-workflow into `graph` and returns its id.
    ///
    /// Boundary inputs are linked to their producers; boundary outputs are
    /// registered with this node as producer.
    pub fn add_into_workflow(self, graph: &mut WorkflowGraph) -> Result<NodeId> {
        debug!(
            "Attaching sub-workflow '{}' ({} boundary inputs, {} boundary outputs)",
            self.node.name(),
            self.spec.boundary_inputs.len(),
            self.spec.boundary_outputs.len()
        );
        graph.add(self.into_node())
    }
}
