//! Workflow Definition Parser
//!
//! Loads workflow definitions from YAML and builds them into a
//! [`WorkflowGraph`]. Artifacts are referred to by alias; nodes by label.
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: inference
//! config:
//!   output_dir: run
//!
//! executables:
//!   make_subdag: { path: /usr/bin/make_subdag, ifos: H1L1, out_dir: sub }
//!   summary: { path: /usr/bin/summary, ifos: H1L1, out_dir: results, retention: final }
//!
//! seeds:
//!   - alias: config
//!     ifos: H1L1
//!     description: config
//!     segment: [1000, 1100]
//!     extension: .ini
//!     directory: seeds
//!     url: inference.ini
//!
//! artifacts:
//!   - alias: posterior
//!     ifos: H1L1
//!     description: inference
//!     segment: [1000, 1100]
//!     extension: .hdf
//!     directory: results
//!
//! nodes:
//!   - kind: job
//!     label: generate
//!     executable: make_subdag
//!     segment: [1000, 1100]
//!     arguments:
//!       - { flag: --config-file, input: config }
//!       - { flag: --output-dag, output: dag, extension: .dag.yml }
//!       - { flag: --output-map, output: map, extension: .map }
//!
//!   - kind: subworkflow
//!     label: inference
//!     dag_file: dag
//!     catalog_map: map
//!     staging_site: local
//!     cache_file: inference.cache
//!     outputs: posterior
//!
//! dependencies:
//!   - { parent: generate, child: inference }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use super::artifact::{Artifact, Retention, Segment};
use super::config::PlanConfig;
use super::error::{PlanError, Result};
use super::graph::WorkflowGraph;
use super::node::{Executable, Node, NodeId};
use super::subworkflow::SubWorkflow;

/// A parsed workflow definition.
#[derive(Deserialize, Debug, Clone)]
pub struct Definition {
    pub name: String,

    #[serde(default)]
    pub config: Option<PlanConfig>,

    #[serde(default)]
    pub executables: BTreeMap<String, ExecutableDef>,

    #[serde(default)]
    pub seeds: Vec<SeedDef>,

    /// Artifacts declared up front, e.g. sub-workflow boundary outputs
    #[serde(default)]
    pub artifacts: Vec<ArtifactDef>,

    #[serde(default)]
    pub nodes: Vec<NodeDef>,

    #[serde(default)]
    pub dependencies: Vec<DependencyDef>,

    /// Directory relative seed paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ExecutableDef {
    pub path: PathBuf,
    pub ifos: String,
    pub out_dir: PathBuf,
    #[serde(default, deserialize_with = "single_or_vec")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub retention: Retention,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ArtifactDef {
    pub alias: String,
    pub ifos: String,
    pub description: String,
    pub segment: Segment,
    pub extension: String,
    #[serde(default = "default_artifact_dir")]
    pub directory: PathBuf,
    #[serde(default, deserialize_with = "single_or_vec")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub retention: Retention,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SeedDef {
    #[serde(flatten)]
    pub artifact: ArtifactDef,
    /// Local path, `file://` or `http(s)://` URL
    pub url: String,
    #[serde(default)]
    pub persistent: bool,
}

/// One command-line entry of a job.
///
/// - `value` alone (with or without `flag`): literal
/// - `input`: one or more artifact aliases
/// - `output` + `extension`: new output artifact named by alias
/// - `flag` alone: switch
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ArgumentDef {
    #[serde(default)]
    pub flag: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "single_or_vec")]
    pub input: Vec<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default, deserialize_with = "single_or_vec")]
    pub tags: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeDef {
    Job {
        label: String,
        executable: String,
        segment: Segment,
        #[serde(default)]
        arguments: Vec<ArgumentDef>,
        /// Inputs not bound to any flag
        #[serde(default, deserialize_with = "single_or_vec")]
        inputs: Vec<String>,
        #[serde(default)]
        retention: Option<Retention>,
    },
    Subworkflow {
        label: String,
        dag_file: String,
        #[serde(default)]
        catalog_map: Option<String>,
        #[serde(default = "default_staging_site")]
        staging_site: String,
        #[serde(default)]
        cache_file: Option<PathBuf>,
        #[serde(default, deserialize_with = "single_or_vec")]
        inputs: Vec<String>,
        #[serde(default, deserialize_with = "single_or_vec")]
        outputs: Vec<String>,
        #[serde(default = "default_stage_out")]
        stage_out: bool,
        #[serde(default)]
        planner_args: BTreeMap<String, String>,
    },
}

impl NodeDef {
    pub fn label(&self) -> &str {
        match self {
            Self::Job { label, .. } | Self::Subworkflow { label, .. } => label,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct DependencyDef {
    pub parent: String,
    pub child: String,
}

/// A definition built into a graph.
#[derive(Debug)]
pub struct BuiltWorkflow {
    pub graph: WorkflowGraph,
    /// Node label -> assigned node id
    pub labels: BTreeMap<String, NodeId>,
    /// Artifact alias -> artifact
    pub artifacts: BTreeMap<String, Artifact>,
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_staging_site() -> String {
    "local".to_string()
}

fn default_stage_out() -> bool {
    true
}

/// Deserializes either a single string or array of strings into Vec<String>
fn single_or_vec<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.is_empty() => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s]),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                _ => Err(de::Error::custom("Expected string in array")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected string or array of strings")),
    }
}

/// Loads a workflow definition from a YAML file.
///
/// Relative seed paths in the definition are resolved against the
/// directory containing the file.
pub fn load_definition(path: &Path) -> Result<Definition> {
    info!("Loading workflow definition from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|e| PlanError::io(path, e))?;
    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    let mut definition = Definition::from_yaml(&yaml_content)?;
    definition.base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    info!(
        "Parsed definition '{}': {} nodes, {} seeds, {} manual dependencies",
        definition.name,
        definition.nodes.len(),
        definition.seeds.len(),
        definition.dependencies.len()
    );
    Ok(definition)
}

impl Definition {
    /// Parses a definition from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| {
            PlanError::Definition(format!(
                "Failed to parse workflow YAML: {}. Check the file format.",
                e
            ))
        })
    }

    /// Configuration from the definition, named after the workflow.
    pub fn plan_config(&self) -> PlanConfig {
        let mut config = self.config.clone().unwrap_or_default();
        config.name = self.name.clone();
        config
    }

    /// Builds the graph using the definition's own configuration.
    pub fn build(&self) -> Result<BuiltWorkflow> {
        self.build_with(self.plan_config())
    }

    /// Builds the graph with an explicit configuration.
    pub fn build_with(&self, config: PlanConfig) -> Result<BuiltWorkflow> {
        let mut builder = Builder {
            definition: self,
            graph: WorkflowGraph::with_config(config),
            labels: BTreeMap::new(),
            artifacts: BTreeMap::new(),
        };

        for seed in &self.seeds {
            let mut artifact = builder.declare(&seed.artifact)?;
            if seed.persistent {
                artifact = artifact.persistent();
                builder.artifacts.insert(seed.artifact.alias.clone(), artifact.clone());
            }
            let url = self.seed_url(&seed.url);
            builder.graph.add_seed(&artifact, &url)?;
        }

        for def in &self.artifacts {
            builder.declare(def)?;
        }

        for node in &self.nodes {
            builder.add_node(node)?;
        }

        for dependency in &self.dependencies {
            let parent = builder.node_id(&dependency.parent)?;
            let child = builder.node_id(&dependency.child)?;
            builder.graph.add_dependency(&parent, &child)?;
        }

        info!(
            "Built '{}': {} nodes, {} artifacts",
            self.name,
            builder.graph.len(),
            builder.graph.registry().len()
        );

        Ok(BuiltWorkflow {
            graph: builder.graph,
            labels: builder.labels,
            artifacts: builder.artifacts,
        })
    }

    /// Anchors relative local seed paths at the definition's directory.
    fn seed_url(&self, url: &str) -> String {
        if url.contains("://") || Path::new(url).is_absolute() {
            return url.to_string();
        }
        self.base_dir.join(url).display().to_string()
    }
}

/// Symbol tables used while building a definition.
struct Builder<'a> {
    definition: &'a Definition,
    graph: WorkflowGraph,
    labels: BTreeMap<String, NodeId>,
    artifacts: BTreeMap<String, Artifact>,
}

impl Builder<'_> {
    fn declare(&mut self, def: &ArtifactDef) -> Result<Artifact> {
        let artifact = Artifact::new(
            &def.ifos,
            &def.description,
            def.segment,
            &def.extension,
            &def.directory,
        )
        .with_tags(&def.tags)
        .with_retention(def.retention);

        self.bind(&def.alias, artifact.clone())?;
        Ok(artifact)
    }

    fn bind(&mut self, alias: &str, artifact: Artifact) -> Result<()> {
        if self.artifacts.contains_key(alias) {
            return Err(PlanError::Definition(format!(
                "Artifact alias '{}' is defined more than once",
                alias
            )));
        }
        self.artifacts.insert(alias.to_string(), artifact);
        Ok(())
    }

    fn artifact(&self, alias: &str, label: &str) -> Result<Artifact> {
        self.artifacts.get(alias).cloned().ok_or_else(|| {
            PlanError::Definition(format!(
                "Node '{}' references unknown artifact '{}'",
                label, alias
            ))
        })
    }

    fn node_id(&self, label: &str) -> Result<NodeId> {
        self.labels
            .get(label)
            .cloned()
            .ok_or_else(|| PlanError::UnknownNode(label.to_string()))
    }

    fn add_node(&mut self, def: &NodeDef) -> Result<()> {
        let label = def.label();
        if self.labels.contains_key(label) {
            return Err(PlanError::DuplicateNode(label.to_string()));
        }

        let id = match def {
            NodeDef::Job {
                executable,
                segment,
                arguments,
                inputs,
                retention,
                ..
            } => {
                let exe = self.executable(executable, label)?;
                let mut node = exe.create_node();
                if let Some(retention) = retention {
                    node.set_retention(*retention);
                }

                for argument in arguments {
                    self.bind_argument(&mut node, argument, *segment, label)?;
                }
                for alias in inputs {
                    let artifact = self.artifact(alias, label)?;
                    node.add_input(&artifact);
                }

                self.graph.add(node)?
            }
            NodeDef::Subworkflow {
                dag_file,
                catalog_map,
                staging_site,
                cache_file,
                inputs,
                outputs,
                stage_out,
                planner_args,
                ..
            } => {
                let dag = self.artifact(dag_file, label)?;
                let mut sub = SubWorkflow::new(label, &dag);

                if let Some(map_alias) = catalog_map {
                    let map = self.artifact(map_alias, label)?;
                    let cache = cache_file
                        .clone()
                        .unwrap_or_else(|| PathBuf::from(format!("{}.cache", label)));
                    sub.set_subworkflow_properties(&map, staging_site.as_str(), cache);
                }

                for (flag, value) in planner_args {
                    sub.add_planner_arg(flag.as_str(), value.as_str());
                }

                let boundary_inputs = inputs
                    .iter()
                    .map(|alias| self.artifact(alias, label))
                    .collect::<Result<Vec<_>>>()?;
                sub.add_inputs(&boundary_inputs.iter().collect::<Vec<_>>());

                let boundary_outputs = outputs
                    .iter()
                    .map(|alias| self.artifact(alias, label))
                    .collect::<Result<Vec<_>>>()?;
                sub.add_outputs(&boundary_outputs.iter().collect::<Vec<_>>(), *stage_out);

                sub.add_into_workflow(&mut self.graph)?
            }
        };

        debug!("Node '{}' -> {}", label, id);
        self.labels.insert(label.to_string(), id);
        Ok(())
    }

    fn executable(&self, name: &str, label: &str) -> Result<Executable> {
        let def = self.definition.executables.get(name).ok_or_else(|| {
            PlanError::Definition(format!(
                "Node '{}' uses undefined executable '{}'",
                label, name
            ))
        })?;

        Ok(Executable::new(name, &def.path, &def.ifos, &def.out_dir)
            .with_tags(&def.tags)
            .with_retention(def.retention))
    }

    fn bind_argument(
        &mut self,
        node: &mut Node,
        argument: &ArgumentDef,
        segment: Segment,
        label: &str,
    ) -> Result<()> {
        let invalid = |reason: &str| {
            PlanError::Definition(format!("Node '{}': {}", label, reason))
        };

        if let Some(alias) = &argument.output {
            let flag = argument
                .flag
                .as_deref()
                .ok_or_else(|| invalid("output arguments need a flag"))?;
            let extension = argument
                .extension
                .as_deref()
                .ok_or_else(|| invalid("output arguments need an extension"))?;

            let artifact = node.new_output_file_opt(segment, extension, flag, &argument.tags);
            return self.bind(alias, artifact);
        }

        if !argument.input.is_empty() {
            let artifacts = argument
                .input
                .iter()
                .map(|alias| self.artifact(alias, label))
                .collect::<Result<Vec<_>>>()?;

            match (&argument.flag, artifacts.as_slice()) {
                (Some(flag), [single]) => node.add_input_opt(flag.as_str(), single),
                (Some(flag), many) => node.add_input_list_opt(flag.as_str(), many),
                (None, many) => many.iter().for_each(|a| node.add_input(a)),
            }
            return Ok(());
        }

        match (&argument.flag, &argument.value) {
            (Some(flag), Some(value)) => node.add_opt(flag.as_str(), value.as_str()),
            (None, Some(value)) => node.add_arg(value.as_str()),
            (Some(flag), None) => node.add_switch(flag.as_str()),
            (None, None) => return Err(invalid("empty argument")),
        }
        Ok(())
    }
}
