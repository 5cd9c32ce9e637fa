//! Workflow Emission
//!
//! Walks a completed graph and writes the bundle the external scheduler
//! consumes:
//! - `{name}.dag.yml`: every node in topological order with its command
//!   line, inputs, outputs, staging instructions and dependency edges
//! - `{name}.map`: catalog of every artifact materialized in the parent's
//!   storage
//! - one reuse catalog per sub-workflow that declares a cache file
//!
//! Emission finalizes the graph. A second call fails with
//! `AlreadyFinalized` instead of writing anything.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Serialize;

use super::artifact::Retention;
use super::catalog::FileCatalog;
use super::error::{PlanError, Result};
use super::graph::{EdgeKind, WorkflowGraph};
use super::node::{Node, NodeKind};
use super::subworkflow::SubWorkflowSpec;

/// Files written by one emission.
#[derive(Debug, Clone)]
pub struct Emission {
    pub dag_path: PathBuf,
    pub catalog_path: PathBuf,
    /// Reuse catalogs written for sub-workflows
    pub cache_paths: Vec<PathBuf>,
    /// Rendered DAG description
    pub dag: String,
    pub catalog: FileCatalog,
}

#[derive(Serialize)]
struct DagDescription {
    name: String,
    site: String,
    jobs: Vec<JobEntry>,
    dependencies: Vec<DependencyEntry>,
}

#[derive(Serialize)]
struct JobEntry {
    id: String,
    name: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    executable: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    arguments: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    inputs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    outputs: Vec<OutputEntry>,
    retention: Retention,
    #[serde(skip_serializing_if = "Option::is_none")]
    subworkflow: Option<SubWorkflowEntry>,
}

#[derive(Serialize)]
struct OutputEntry {
    lfn: String,
    retention: Retention,
    #[serde(skip_serializing_if = "is_false")]
    stage_out: bool,
}

#[derive(Serialize)]
struct SubWorkflowEntry {
    dag_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    catalog_map: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    staging_site: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_file: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    boundary_inputs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stage_out: Vec<String>,
}

#[derive(Serialize)]
struct DependencyEntry {
    parent: String,
    child: String,
    kind: &'static str,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl WorkflowGraph {
    /// Validates the graph, writes the emission into the configured output
    /// directory and finalizes the graph.
    ///
    /// The graph is finalized before anything is checked, so a failed save
    /// (a cycle, an unresolved input, colliding output paths, an I/O error)
    /// cannot be retried on the same graph: every later `save` or
    /// [`Self::save_to`] returns `AlreadyFinalized`. Nothing is written unless
    /// all checks pass.
    pub fn save(&mut self) -> Result<Emission> {
        self.finalize()?;
        emit(self)
    }

    /// Like [`Self::save`], writing into `output_dir` instead.
    pub fn save_to(&mut self, output_dir: impl Into<PathBuf>) -> Result<Emission> {
        self.set_output_dir(output_dir)?;
        self.save()
    }
}

fn emit(graph: &WorkflowGraph) -> Result<Emission> {
    let order = graph.validate()?;
    let catalog = graph.catalog();

    check_persistent_staging(graph)?;

    let mut jobs = Vec::with_capacity(order.len());
    for id in &order {
        let node = graph
            .node(id)
            .ok_or_else(|| PlanError::UnknownNode(id.to_string()))?;

        for input in node.inputs() {
            let lfn = input.lfn();
            if !catalog.contains(&lfn) {
                return Err(PlanError::UnresolvedDependency {
                    node: id.to_string(),
                    lfn,
                });
            }
        }

        jobs.push(job_entry(node, id.to_string()));
    }

    let dependencies = graph
        .edges()
        .into_iter()
        .map(|(parent, child, kind)| DependencyEntry {
            parent: parent.to_string(),
            child: child.to_string(),
            kind: match kind {
                EdgeKind::Data => "data",
                EdgeKind::Manual => "manual",
            },
        })
        .collect::<Vec<_>>();

    let description = DagDescription {
        name: graph.name().to_string(),
        site: graph.config().site.clone(),
        jobs,
        dependencies,
    };
    let dag = serde_yaml::to_string(&description)?;

    let output_dir = graph.config().output_dir.clone();
    let dag_path = output_dir.join(format!("{}.dag.yml", graph.name()));
    let catalog_path = output_dir.join(format!("{}.map", graph.name()));

    let mut caches = Vec::new();
    for id in &order {
        let Some(spec) = graph.node(id).and_then(Node::subworkflow) else {
            continue;
        };
        let Some(cache_file) = &spec.cache_file else {
            continue;
        };
        caches.push((id, anchor(&output_dir, cache_file), graph.subworkflow_catalog(id)?));
    }

    check_distinct_paths(
        [
            (dag_path.as_path(), "the DAG description".to_string()),
            (catalog_path.as_path(), "the catalog map".to_string()),
        ]
        .into_iter()
        .chain(
            caches
                .iter()
                .map(|(id, path, _)| (path.as_path(), format!("the cache file of '{}'", id))),
        ),
    )?;

    // Everything is rendered; only writes remain
    fs::create_dir_all(&output_dir).map_err(|e| PlanError::io(&output_dir, e))?;

    fs::write(&dag_path, &dag).map_err(|e| PlanError::io(&dag_path, e))?;
    info!("Wrote DAG description to {}", dag_path.display());

    catalog.write(&catalog_path)?;

    let mut cache_paths = Vec::with_capacity(caches.len());
    for (_, path, cache) in caches {
        cache.write(&path)?;
        cache_paths.push(path);
    }

    info!(
        "Planned '{}': {} nodes, {} edges, {} catalog entries",
        graph.name(),
        order.len(),
        description.dependencies.len(),
        catalog.len()
    );

    Ok(Emission {
        dag_path,
        catalog_path,
        cache_paths,
        dag,
        catalog,
    })
}

/// Persistent artifacts must not stay inside a sub-workflow.
fn check_persistent_staging(graph: &WorkflowGraph) -> Result<()> {
    for record in graph.registry().persistent() {
        let Some(producer) = record.producer() else {
            continue;
        };
        let lfn = record.artifact.lfn();

        if let Some(spec) = graph.node(producer).and_then(Node::subworkflow) {
            if !spec.stages_out(&lfn) {
                return Err(PlanError::PersistentNotStaged {
                    lfn,
                    producer: producer.to_string(),
                });
            }
            debug!("Persistent '{}' staged out of '{}'", lfn, producer);
        }
    }
    Ok(())
}

fn job_entry(node: &Node, id: String) -> JobEntry {
    let spec = match node.kind() {
        NodeKind::SubWorkflow(spec) => Some(spec),
        NodeKind::Job => None,
    };

    let outputs = node
        .outputs()
        .iter()
        .map(|artifact| {
            let lfn = artifact.lfn();
            let stage_out = match spec {
                Some(spec) => spec.stages_out(&lfn),
                None => artifact.is_persistent(),
            };
            OutputEntry {
                lfn,
                retention: artifact.retention,
                stage_out,
            }
        })
        .collect();

    JobEntry {
        id,
        name: node.name().to_string(),
        kind: if spec.is_some() { "subworkflow" } else { "job" },
        executable: node.executable().map(|e| e.path.display().to_string()),
        arguments: node.command_line(),
        inputs: node.inputs().iter().map(|a| a.lfn()).collect(),
        outputs,
        retention: node.retention(),
        subworkflow: spec.map(subworkflow_entry),
    }
}

fn subworkflow_entry(spec: &SubWorkflowSpec) -> SubWorkflowEntry {
    SubWorkflowEntry {
        dag_file: spec.dag_file.lfn(),
        catalog_map: spec.catalog_map.as_ref().map(|a| a.lfn()),
        staging_site: spec.staging_site.clone(),
        cache_file: spec.cache_file.as_ref().map(|p| p.display().to_string()),
        boundary_inputs: spec.boundary_inputs.iter().map(|a| a.lfn()).collect(),
        stage_out: spec
            .boundary_outputs
            .iter()
            .filter(|o| o.stage_out)
            .map(|o| o.artifact.lfn())
            .collect(),
    }
}

/// Fails if two emitted files would land on the same path.
fn check_distinct_paths<'a>(paths: impl IntoIterator<Item = (&'a Path, String)>) -> Result<()> {
    let mut seen: HashMap<PathBuf, String> = HashMap::new();
    for (path, what) in paths {
        let key: PathBuf = path.components().collect();
        if let Some(first) = seen.get(&key) {
            return Err(PlanError::UnsupportedConfiguration(format!(
                "{} and {} would both be written to {}",
                first,
                what,
                path.display()
            )));
        }
        seen.insert(key, what);
    }
    Ok(())
}

fn anchor(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::artifact::{Artifact, Segment};
    use crate::workflow::config::{PlanConfig, StagingPolicy};
    use crate::workflow::node::{Executable, NodeId};
    use crate::workflow::subworkflow::SubWorkflow;
    use tempfile::tempdir;

    fn seg() -> Segment {
        Segment::new(1000, 1100)
    }

    fn graph_in(dir: &Path) -> WorkflowGraph {
        let mut config = PlanConfig::named("inference");
        config.output_dir = dir.to_path_buf();
        WorkflowGraph::with_config(config)
    }

    fn exe(name: &str) -> Executable {
        Executable::new(name, format!("/usr/bin/{}", name), "H1L1", "out")
    }

    /// gen(X) -> gen(Y), gen(X) -> final, gen(Y) -> final
    fn three_node_graph(graph: &mut WorkflowGraph) -> (NodeId, NodeId, NodeId, Artifact, Artifact) {
        let mut gen_x = exe("gen").create_node();
        let x = gen_x.new_output_file_opt(seg(), ".hdf", "--output-file", &["A"]);
        let gx = graph.add(gen_x).unwrap();

        let mut gen_y = exe("gen").create_node();
        gen_y.add_input_opt("--input-file", &x);
        let y = gen_y.new_output_file_opt(seg(), ".hdf", "--output-file", &["B"]);
        let gy = graph.add(gen_y).unwrap();

        let mut last = exe("final").with_retention(Retention::Final).create_node();
        last.add_input_list_opt("--input-files", &[x.clone(), y.clone()]);
        let fin = graph.add(last).unwrap();

        (gx, gy, fin, x, y)
    }

    #[test]
    fn test_end_to_end_three_nodes() {
        let dir = tempdir().unwrap();
        let mut graph = graph_in(dir.path());
        let (gx, gy, fin, x, y) = three_node_graph(&mut graph);

        let emission = graph.save().unwrap();

        let edges: Vec<(NodeId, NodeId)> = graph
            .edges()
            .into_iter()
            .map(|(p, c, _)| (p, c))
            .collect();
        assert_eq!(edges.len(), 3);
        assert!(edges.contains(&(gx.clone(), gy.clone())));
        assert!(edges.contains(&(gx, fin.clone())));
        assert!(edges.contains(&(gy, fin)));

        assert_eq!(emission.catalog.len(), 2);
        let px = &emission.catalog.get(&x.lfn()).unwrap().pfn;
        let py = &emission.catalog.get(&y.lfn()).unwrap().pfn;
        assert!(!px.is_empty());
        assert!(!py.is_empty());
        assert_ne!(px, py);

        assert!(emission.dag_path.exists());
        assert!(emission.catalog_path.exists());
        assert_eq!(fs::read_to_string(&emission.dag_path).unwrap(), emission.dag);
        assert_eq!(
            FileCatalog::load(&emission.catalog_path).unwrap(),
            emission.catalog
        );
    }

    #[test]
    fn test_dag_description_contents() {
        let dir = tempdir().unwrap();
        let mut graph = graph_in(dir.path());
        three_node_graph(&mut graph);

        let emission = graph.save().unwrap();
        let dag: serde_yaml::Value = serde_yaml::from_str(&emission.dag).unwrap();

        assert_eq!(dag["name"].as_str(), Some("inference"));
        let jobs = dag["jobs"].as_sequence().unwrap();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0]["id"].as_str(), Some("gen_ID000001"));
        assert_eq!(jobs[0]["kind"].as_str(), Some("job"));
        assert_eq!(jobs[0]["executable"].as_str(), Some("/usr/bin/gen"));
        assert_eq!(jobs[2]["retention"].as_str(), Some("final"));
        assert_eq!(
            jobs[2]["arguments"][0].as_str(),
            Some("--input-files")
        );

        let deps = dag["dependencies"].as_sequence().unwrap();
        assert_eq!(deps.len(), 3);
        assert_eq!(deps[0]["kind"].as_str(), Some("data"));
    }

    #[test]
    fn test_second_save_fails_fast() {
        let dir = tempdir().unwrap();
        let mut graph = graph_in(dir.path());
        three_node_graph(&mut graph);

        let first = graph.save().unwrap();
        let written = fs::read_to_string(&first.dag_path).unwrap();

        assert!(matches!(graph.save(), Err(PlanError::AlreadyFinalized(_))));
        assert_eq!(fs::read_to_string(&first.dag_path).unwrap(), written);
    }

    #[test]
    fn test_save_to_overrides_output_dir() {
        let dir = tempdir().unwrap();
        let mut graph = WorkflowGraph::new("inference");
        three_node_graph(&mut graph);

        let emission = graph.save_to(dir.path().join("run")).unwrap();
        assert_eq!(emission.dag_path, dir.path().join("run").join("inference.dag.yml"));
        assert!(emission.catalog_path.exists());
        assert!(emission
            .catalog
            .iter()
            .all(|(_, entry)| entry.pfn.starts_with(&dir.path().display().to_string())));
    }

    #[test]
    fn test_identical_graphs_emit_identical_dags() {
        let first_dir = tempdir().unwrap();
        let second_dir = tempdir().unwrap();

        let mut first = graph_in(first_dir.path());
        let mut second = graph_in(second_dir.path());
        three_node_graph(&mut first);
        three_node_graph(&mut second);

        assert_eq!(first.save().unwrap().dag, second.save().unwrap().dag);
    }

    #[test]
    fn test_cycle_aborts_emission() {
        let dir = tempdir().unwrap();
        let mut graph = graph_in(dir.path());
        let (gx, gy, _, _, _) = three_node_graph(&mut graph);
        graph.add_dependency(&gy, &gx).unwrap();

        assert!(matches!(graph.save(), Err(PlanError::CycleDetected { .. })));
        assert!(!dir.path().join("inference.dag.yml").exists());
    }

    /// Two generated sub-workflows, A producing `x` for B.
    fn subworkflow_pair(graph: &mut WorkflowGraph, stage_out: bool) -> (NodeId, NodeId, Artifact) {
        let mut gen = exe("make_subdag").create_node();
        let dag_a = gen.new_output_file_opt(seg(), ".dag.yml", "--output-dag-a", &["a"]);
        let map_a = gen.new_output_file_opt(seg(), ".map", "--output-map-a", &["a"]);
        let dag_b = gen.new_output_file_opt(seg(), ".dag.yml", "--output-dag-b", &["b"]);
        let map_b = gen.new_output_file_opt(seg(), ".map", "--output-map-b", &["b"]);
        graph.add(gen).unwrap();

        let x = Artifact::new("H1L1", "inference", seg(), ".hdf", "results").with_tags(&["a"]);

        let mut sub_a = SubWorkflow::new("inference_a", &dag_a);
        sub_a.set_subworkflow_properties(&map_a, "local", "inference_a.cache");
        sub_a.add_outputs(&[&x], stage_out);
        let a = sub_a.add_into_workflow(graph).unwrap();

        let mut sub_b = SubWorkflow::new("inference_b", &dag_b);
        sub_b.set_subworkflow_properties(&map_b, "local", "inference_b.cache");
        sub_b.add_inputs(&[&x]);
        let b = sub_b.add_into_workflow(graph).unwrap();

        (a, b, x)
    }

    #[test]
    fn test_subworkflows_emit_caches_and_staging() {
        let dir = tempdir().unwrap();
        let mut graph = graph_in(dir.path());
        let (_, _, x) = subworkflow_pair(&mut graph, true);

        let emission = graph.save().unwrap();

        assert_eq!(emission.cache_paths.len(), 2);
        let cache_b = FileCatalog::load(&dir.path().join("inference_b.cache")).unwrap();
        assert!(cache_b.contains(&x.lfn()));
        let cache_a = FileCatalog::load(&dir.path().join("inference_a.cache")).unwrap();
        assert!(cache_a.is_empty());

        let dag: serde_yaml::Value = serde_yaml::from_str(&emission.dag).unwrap();
        let sub_a = &dag["jobs"][1];
        assert_eq!(sub_a["kind"].as_str(), Some("subworkflow"));
        assert_eq!(sub_a["subworkflow"]["stage_out"][0].as_str(), Some(x.lfn().as_str()));
        assert_eq!(sub_a["outputs"][0]["stage_out"].as_bool(), Some(true));
        assert!(emission.catalog.contains(&x.lfn()));
    }

    /// One generated sub-workflow whose cache file is `cache_file`.
    fn cached_subworkflow(graph: &mut WorkflowGraph, tag: &str, cache_file: &str) -> NodeId {
        let mut gen = exe("make_subdag").create_node();
        let dag = gen.new_output_file_opt(seg(), ".dag.yml", "--output-dag", &[tag]);
        let map = gen.new_output_file_opt(seg(), ".map", "--output-map", &[tag]);
        graph.add(gen).unwrap();

        let mut sub = SubWorkflow::new(format!("inference_{}", tag), &dag);
        sub.set_subworkflow_properties(&map, "local", cache_file);
        sub.add_into_workflow(graph).unwrap()
    }

    #[test]
    fn test_cache_file_cannot_overwrite_catalog_map() {
        let dir = tempdir().unwrap();
        let mut graph = graph_in(dir.path());
        cached_subworkflow(&mut graph, "a", "inference.map");

        match graph.save() {
            Err(PlanError::UnsupportedConfiguration(message)) => {
                assert!(message.contains("catalog map"));
            }
            other => panic!("expected UnsupportedConfiguration, got {:?}", other),
        }
        assert!(!dir.path().join("inference.map").exists());
        assert!(!dir.path().join("inference.dag.yml").exists());
    }

    #[test]
    fn test_cache_files_must_be_distinct() {
        let dir = tempdir().unwrap();
        let mut graph = graph_in(dir.path());
        cached_subworkflow(&mut graph, "a", "shared.cache");
        cached_subworkflow(&mut graph, "b", "./shared.cache");

        assert!(matches!(
            graph.save(),
            Err(PlanError::UnsupportedConfiguration(_))
        ));
        assert!(!dir.path().join("shared.cache").exists());
    }

    #[test]
    fn test_failed_save_cannot_be_retried() {
        let dir = tempdir().unwrap();
        let mut graph = graph_in(dir.path());
        let (gx, gy, _, _, _) = three_node_graph(&mut graph);
        graph.add_dependency(&gy, &gx).unwrap();

        assert!(graph.save().is_err());
        assert!(matches!(
            graph.save_to(dir.path().join("retry")),
            Err(PlanError::AlreadyFinalized(_))
        ));
        assert!(!dir.path().join("retry").exists());
    }

    #[test]
    fn test_unstaged_sibling_input_is_unresolved() {
        let dir = tempdir().unwrap();
        let mut graph = graph_in(dir.path());
        graph.set_staging_policy(StagingPolicy::Permissive);
        let (_, b, x) = subworkflow_pair(&mut graph, false);

        assert!(!graph.subworkflow_catalog(&b).unwrap().contains(&x.lfn()));

        match graph.save() {
            Err(PlanError::UnresolvedDependency { node, lfn }) => {
                assert_eq!(node, b.to_string());
                assert_eq!(lfn, x.lfn());
            }
            other => panic!("expected UnresolvedDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_persistent_artifact_must_be_staged() {
        let dir = tempdir().unwrap();
        let mut graph = graph_in(dir.path());

        let mut gen = exe("make_subdag").create_node();
        let dag = gen.new_output_file_opt(seg(), ".dag.yml", "--output-dag", &["a"]);
        graph.add(gen).unwrap();

        let kept = Artifact::new("H1L1", "summary", seg(), ".hdf", "results").persistent();
        let mut sub = SubWorkflow::new("inference_a", &dag);
        sub.add_outputs(&[&kept], false);
        sub.add_into_workflow(&mut graph).unwrap();

        assert!(matches!(
            graph.save(),
            Err(PlanError::PersistentNotStaged { .. })
        ));
    }

    #[test]
    fn test_manual_edges_are_labelled() {
        let dir = tempdir().unwrap();
        let mut graph = graph_in(dir.path());
        let (a, b, _) = subworkflow_pair(&mut graph, true);

        let mut other = exe("summary").create_node();
        other.new_output_file_opt(seg(), ".html", "--output-file", &[] as &[&str]);
        let s = graph.add(other).unwrap();
        graph.add_dependency(&b, &s).unwrap();

        let emission = graph.save().unwrap();
        let dag: serde_yaml::Value = serde_yaml::from_str(&emission.dag).unwrap();
        let deps = dag["dependencies"].as_sequence().unwrap();

        let manual: Vec<_> = deps
            .iter()
            .filter(|d| d["kind"].as_str() == Some("manual"))
            .collect();
        assert_eq!(manual.len(), 1);
        assert_eq!(manual[0]["parent"].as_str(), Some(b.as_str()));
        assert_eq!(manual[0]["child"].as_str(), Some(s.as_str()));
        assert!(deps.iter().any(|d| d["parent"].as_str() == Some(a.as_str())
            && d["child"].as_str() == Some(b.as_str())));
    }
}
