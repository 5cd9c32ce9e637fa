//! Workflow Nodes
//!
//! A node is one unit of computation: an executable with an ordered list of
//! command-line bindings, the artifacts it reads and the artifacts it
//! writes. Sub-workflows are nodes too (see [`super::subworkflow`]).
//!
//! # Example
//!
//! ```
//! use dagplan::workflow::{Executable, Segment};
//!
//! let exe = Executable::new("inference", "/usr/bin/inference", "H1L1", "results");
//! let mut node = exe.create_node();
//! node.add_opt("--nsamples", "5000");
//! let posterior = node.new_output_file_opt(Segment::new(1000, 1064), ".hdf", "--output-file", &["a"]);
//!
//! assert_eq!(posterior.lfn(), "H1L1-INFERENCE_A-1000-64.hdf");
//! ```

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::artifact::{Artifact, Retention, Segment};
use super::subworkflow::SubWorkflowSpec;

/// Unique identity of a node within one workflow graph.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A program that workflow nodes run.
///
/// Outputs allocated through [`Node::new_output_file_opt`] take their
/// identity from the executable: its ifos, its name as description, its
/// tags and its output directory.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Executable {
    pub name: String,
    pub path: PathBuf,
    pub ifos: String,
    pub out_dir: PathBuf,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub retention: Retention,
}

impl Executable {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        ifos: impl Into<String>,
        out_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into().trim().to_string(),
            path: path.into(),
            ifos: ifos.into().trim().to_string(),
            out_dir: out_dir.into(),
            tags: Vec::new(),
            retention: Retention::default(),
        }
    }

    pub fn with_tags<S: AsRef<str>>(mut self, tags: &[S]) -> Self {
        self.tags = tags.iter().map(|t| t.as_ref().to_string()).collect();
        self
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    /// Creates an empty node running this executable.
    pub fn create_node(&self) -> Node {
        Node {
            id: None,
            name: self.name.clone(),
            executable: Some(self.clone()),
            options: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            retention: self.retention,
            kind: NodeKind::Job,
        }
    }
}

/// Value bound to a command-line position.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// Bare switch with no value
    Switch,
    Literal(String),
    /// One artifact, rendered by its LFN
    Artifact(String),
    /// Several artifacts following one flag
    Artifacts(Vec<String>),
}

/// One entry of a node's command line. Positional arguments have no flag.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionBinding {
    pub flag: Option<String>,
    pub value: OptionValue,
}

impl OptionBinding {
    fn render_into(&self, args: &mut Vec<String>) {
        if let Some(flag) = &self.flag {
            args.push(flag.clone());
        }
        match &self.value {
            OptionValue::Switch => {}
            OptionValue::Literal(value) | OptionValue::Artifact(value) => args.push(value.clone()),
            OptionValue::Artifacts(values) => args.extend(values.iter().cloned()),
        }
    }
}

/// Plain job or opaque sub-workflow.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Job,
    SubWorkflow(SubWorkflowSpec),
}

/// A unit of computation in a workflow graph.
///
/// Nodes are built up with the `add_*` methods and become immutable once
/// handed to [`super::WorkflowGraph::add`], which assigns their id.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: Option<NodeId>,
    name: String,
    executable: Option<Executable>,
    options: Vec<OptionBinding>,
    inputs: Vec<Artifact>,
    outputs: Vec<Artifact>,
    retention: Retention,
    pub(crate) kind: NodeKind,
}

impl Node {
    /// Creates a node with no executable, used for sub-workflows.
    pub(crate) fn bare(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into().trim().to_string(),
            executable: None,
            options: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            retention: Retention::default(),
            kind: NodeKind::Job,
        }
    }

    /// Binds a literal value to `flag`.
    pub fn add_opt(&mut self, flag: impl Into<String>, value: impl Into<String>) {
        self.options.push(OptionBinding {
            flag: Some(flag.into()),
            value: OptionValue::Literal(value.into()),
        });
    }

    /// Adds a bare switch such as `--verbose`.
    pub fn add_switch(&mut self, flag: impl Into<String>) {
        self.options.push(OptionBinding {
            flag: Some(flag.into()),
            value: OptionValue::Switch,
        });
    }

    /// Adds a positional argument.
    pub fn add_arg(&mut self, value: impl Into<String>) {
        self.options.push(OptionBinding {
            flag: None,
            value: OptionValue::Literal(value.into()),
        });
    }

    /// Declares `artifact` as an input without binding it to a flag.
    pub fn add_input(&mut self, artifact: &Artifact) {
        let lfn = artifact.lfn();
        if !self.inputs.iter().any(|a| a.lfn() == lfn) {
            self.inputs.push(artifact.clone());
        }
    }

    /// Binds `flag` to an input artifact.
    pub fn add_input_opt(&mut self, flag: impl Into<String>, artifact: &Artifact) {
        self.add_input(artifact);
        self.options.push(OptionBinding {
            flag: Some(flag.into()),
            value: OptionValue::Artifact(artifact.lfn()),
        });
    }

    /// Binds `flag` to several input artifacts.
    pub fn add_input_list_opt(&mut self, flag: impl Into<String>, artifacts: &[Artifact]) {
        for artifact in artifacts {
            self.add_input(artifact);
        }
        self.options.push(OptionBinding {
            flag: Some(flag.into()),
            value: OptionValue::Artifacts(artifacts.iter().map(Artifact::lfn).collect()),
        });
    }

    /// Declares `artifact` as an output without binding it to a flag.
    pub fn add_output(&mut self, artifact: &Artifact) {
        let lfn = artifact.lfn();
        match self.outputs.iter_mut().find(|a| a.lfn() == lfn) {
            Some(existing) => {
                if artifact.is_persistent() {
                    existing.persistence = artifact.persistence;
                }
            }
            None => self.outputs.push(artifact.clone()),
        }
    }

    /// Binds `flag` to an output artifact.
    pub fn add_output_opt(&mut self, flag: impl Into<String>, artifact: &Artifact) {
        self.add_output(artifact);
        self.options.push(OptionBinding {
            flag: Some(flag.into()),
            value: OptionValue::Artifact(artifact.lfn()),
        });
    }

    /// Allocates a new output artifact, binds it to `flag` and returns it.
    ///
    /// The artifact is named after this node's executable, so passing the
    /// returned value on as another node's input is how nodes get linked.
    pub fn new_output_file_opt<S: AsRef<str>>(
        &mut self,
        segment: Segment,
        extension: &str,
        flag: impl Into<String>,
        tags: &[S],
    ) -> Artifact {
        let (ifos, out_dir, mut all_tags) = match &self.executable {
            Some(exe) => (exe.ifos.clone(), exe.out_dir.clone(), exe.tags.clone()),
            None => (String::new(), PathBuf::new(), Vec::new()),
        };
        all_tags.extend(tags.iter().map(|t| t.as_ref().to_string()));

        let artifact = Artifact::new(ifos, &self.name, segment, extension, out_dir)
            .with_tags(&all_tags)
            .with_retention(self.retention);

        self.add_output_opt(flag, &artifact);
        artifact
    }

    /// Id assigned by the graph, `None` until the node is added.
    pub fn id(&self) -> Option<&NodeId> {
        self.id.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executable(&self) -> Option<&Executable> {
        self.executable.as_ref()
    }

    pub fn inputs(&self) -> &[Artifact] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Artifact] {
        &self.outputs
    }

    pub fn options(&self) -> &[OptionBinding] {
        &self.options
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    pub fn set_retention(&mut self, retention: Retention) {
        self.retention = retention;
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Returns the sub-workflow boundary, if this node is a sub-workflow.
    pub fn subworkflow(&self) -> Option<&SubWorkflowSpec> {
        match &self.kind {
            NodeKind::SubWorkflow(spec) => Some(spec),
            NodeKind::Job => None,
        }
    }

    pub fn is_subworkflow(&self) -> bool {
        self.subworkflow().is_some()
    }

    /// Renders the command-line arguments in binding order.
    pub fn command_line(&self) -> Vec<String> {
        let mut args = Vec::new();
        for binding in &self.options {
            binding.render_into(&mut args);
        }
        args
    }
}
