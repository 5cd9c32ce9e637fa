//! Workflow Graph
//!
//! The aggregate DAG of a planning run. The graph owns every node and the
//! artifact registry, infers edges from producer/consumer relationships
//! as nodes are added, and accepts manual edges for dependencies that no
//! artifact expresses.
//!
//! A graph is `Open` while it is being built and becomes `Finalized` when
//! it is emitted; every mutation after that fails.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;

use log::{debug, info, warn};

use super::artifact::Artifact;
use super::catalog::{CatalogEntry, FileCatalog};
use super::config::{PlanConfig, StagingPolicy};
use super::error::{PlanError, Result};
use super::node::{Node, NodeId};
use super::registry::{ArtifactRegistry, Origin};

/// Lifecycle state of a workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    /// Nodes, seeds and edges may be added
    Open,
    /// Emitted; no further changes allowed
    Finalized,
}

/// How an edge came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Inferred from an artifact the parent produces and the child consumes
    Data,
    /// Declared with [`WorkflowGraph::add_dependency`] only
    Manual,
}

/// Directed acyclic graph of workflow nodes.
#[derive(Debug)]
pub struct WorkflowGraph {
    config: PlanConfig,
    state: GraphState,
    registry: ArtifactRegistry,
    /// Nodes in insertion order
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    /// Child -> set of parents
    parents: HashMap<NodeId, BTreeSet<NodeId>>,
    data_edges: BTreeSet<(NodeId, NodeId)>,
    manual_edges: BTreeSet<(NodeId, NodeId)>,
}

impl WorkflowGraph {
    /// Creates an empty graph with default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(PlanConfig::named(name))
    }

    /// Creates an empty graph from a configuration.
    pub fn with_config(config: PlanConfig) -> Self {
        let mut registry = ArtifactRegistry::new(config.seed_dir());
        registry.set_max_attempts(config.resolve_attempts);
        registry.set_root(&config.output_dir);

        Self {
            config,
            state: GraphState::Open,
            registry,
            nodes: Vec::new(),
            index: HashMap::new(),
            parents: HashMap::new(),
            data_edges: BTreeSet::new(),
            manual_edges: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &PlanConfig {
        &self.config
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn is_finalized(&self) -> bool {
        self.state == GraphState::Finalized
    }

    pub fn set_staging_policy(&mut self, policy: StagingPolicy) {
        self.config.staging_policy = policy;
    }

    /// Changes where emitted files and relative artifacts are anchored.
    pub fn set_output_dir(&mut self, dir: impl Into<PathBuf>) -> Result<()> {
        self.ensure_open()?;
        self.config.output_dir = dir.into();
        self.registry.set_root(&self.config.output_dir);
        Ok(())
    }

    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            GraphState::Open => Ok(()),
            GraphState::Finalized => Err(PlanError::AlreadyFinalized(self.config.name.clone())),
        }
    }

    /// Moves the graph to `Finalized`. Fails if it already is.
    pub(crate) fn finalize(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = GraphState::Finalized;
        info!("Workflow '{}' finalized", self.config.name);
        Ok(())
    }

    /// Registers an externally supplied file, resolving `url` to a local path.
    pub fn add_seed(&mut self, artifact: &Artifact, url: &str) -> Result<PathBuf> {
        self.ensure_open()?;
        self.registry.register_seed(artifact, url)
    }

    /// Adds a node and returns the id assigned to it.
    ///
    /// Every output is registered with the new node as producer and every
    /// input gets an edge from its producer. The graph is left unchanged
    /// if any check fails.
    pub fn add(&mut self, mut node: Node) -> Result<NodeId> {
        self.ensure_open()?;

        let id = NodeId::from(format!(
            "{}_ID{:06}",
            id_prefix(node.name()),
            self.nodes.len() + 1
        ));
        if self.index.contains_key(&id) {
            return Err(PlanError::DuplicateNode(id.to_string()));
        }

        for output in node.outputs() {
            self.registry.check_unclaimed(&output.lfn(), &id)?;
        }

        let mut parents = BTreeSet::new();
        for input in node.inputs() {
            let lfn = input.lfn();
            let record = self
                .registry
                .get(&lfn)
                .ok_or_else(|| PlanError::UnknownProducer {
                    node: id.to_string(),
                    lfn: lfn.clone(),
                })?;

            if let Some(producer) = record.producer() {
                self.check_boundary(producer, &node, &id, &lfn)?;
                parents.insert(producer.clone());
            }
        }

        for output in node.outputs() {
            self.registry.register(output, &id)?;
        }
        for input in node.inputs() {
            self.registry.add_consumer(&input.lfn(), &id);
        }
        for parent in &parents {
            debug!("Edge {} -> {} (data)", parent, id);
            self.data_edges.insert((parent.clone(), id.clone()));
        }

        info!(
            "Added {} '{}' ({} inputs, {} outputs, {} parents)",
            if node.is_subworkflow() { "sub-workflow" } else { "job" },
            id,
            node.inputs().len(),
            node.outputs().len(),
            parents.len()
        );

        node.id = Some(id.clone());
        self.parents.insert(id.clone(), parents);
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(node);

        Ok(id)
    }

    /// Checks that `consumer` may read `lfn` from `producer`.
    fn check_boundary(
        &self,
        producer: &NodeId,
        consumer: &Node,
        consumer_id: &NodeId,
        lfn: &str,
    ) -> Result<()> {
        let Some(spec) = self.node(producer).and_then(Node::subworkflow) else {
            return Ok(());
        };

        if !consumer.is_subworkflow() {
            return Err(PlanError::UnsupportedConfiguration(format!(
                "job '{}' consumes '{}' produced inside sub-workflow '{}'; \
                 sub-workflow outputs can only be consumed by other sub-workflows",
                consumer_id, lfn, producer
            )));
        }

        if spec.stages_out(lfn) {
            return Ok(());
        }

        match self.config.staging_policy {
            StagingPolicy::Strict => Err(PlanError::UnstagedBoundaryOutput {
                lfn: lfn.to_string(),
                producer: producer.to_string(),
                consumer: consumer_id.to_string(),
            }),
            StagingPolicy::Permissive => {
                warn!(
                    "'{}' consumes '{}' from sub-workflow '{}' which does not stage it out; \
                     it will be missing from the consumer's catalog",
                    consumer_id, lfn, producer
                );
                Ok(())
            }
        }
    }

    /// Adds an edge that no artifact expresses.
    ///
    /// Needed when two sub-workflows exchange a file that only appears in
    /// their catalogs, so the parent cannot see the link.
    pub fn add_dependency(&mut self, parent: &NodeId, child: &NodeId) -> Result<()> {
        self.ensure_open()?;

        for id in [parent, child] {
            if !self.index.contains_key(id) {
                return Err(PlanError::UnknownNode(id.to_string()));
            }
        }

        if parent == child {
            return Err(PlanError::CycleDetected {
                nodes: vec![parent.to_string()],
            });
        }

        debug!("Edge {} -> {} (manual)", parent, child);
        self.parents
            .entry(child.clone())
            .or_default()
            .insert(parent.clone());
        self.manual_edges.insert((parent.clone(), child.clone()));
        Ok(())
    }

    /// Checks that the graph is acyclic and returns a topological order.
    ///
    /// Uses Kahn's algorithm, visiting ready nodes in insertion order so
    /// the result is deterministic. On failure every node on or between
    /// cycles is named.
    pub fn validate(&self) -> Result<Vec<NodeId>> {
        let children = self.children_map();

        let mut in_degree: HashMap<&NodeId, usize> = self
            .nodes
            .iter()
            .filter_map(|n| n.id())
            .map(|id| (id, self.parents.get(id).map_or(0, BTreeSet::len)))
            .collect();

        let mut queue: VecDeque<&NodeId> = self
            .nodes
            .iter()
            .filter_map(|n| n.id())
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        let mut sorted: Vec<NodeId> = Vec::with_capacity(self.nodes.len());

        while let Some(current) = queue.pop_front() {
            sorted.push(current.clone());

            for child in children.get(current).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            let done: BTreeSet<&NodeId> = sorted.iter().collect();
            let remaining: BTreeSet<&NodeId> = in_degree
                .keys()
                .copied()
                .filter(|id| !done.contains(id))
                .collect();
            let nodes = cycle_members(remaining, &children);
            return Err(PlanError::CycleDetected { nodes });
        }

        debug!(
            "Topological order: {:?}",
            sorted.iter().map(NodeId::as_str).collect::<Vec<_>>()
        );
        Ok(sorted)
    }

    /// Alias for [`Self::validate`] for callers that only want the order.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        self.validate()
    }

    /// Child lists keyed by parent, children in insertion order.
    fn children_map(&self) -> HashMap<&NodeId, Vec<&NodeId>> {
        let mut children: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
        for child in self.nodes.iter().filter_map(|n| n.id()) {
            for parent in self.parents.get(child).into_iter().flatten() {
                children.entry(parent).or_default().push(child);
            }
        }
        children
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Parents of `id`, sorted.
    pub fn parents(&self, id: &NodeId) -> Vec<&NodeId> {
        self.parents
            .get(id)
            .map(|p| p.iter().collect())
            .unwrap_or_default()
    }

    /// Children of `id`, in insertion order.
    pub fn children(&self, id: &NodeId) -> Vec<&NodeId> {
        self.children_map().remove(id).unwrap_or_default()
    }

    /// True if an edge `parent -> child` exists, inferred or manual.
    pub fn has_edge(&self, parent: &NodeId, child: &NodeId) -> bool {
        self.parents
            .get(child)
            .is_some_and(|parents| parents.contains(parent))
    }

    /// All edges as `(parent, child, kind)`, sorted by parent then child.
    ///
    /// An edge both inferred and declared manually counts as a data edge.
    pub fn edges(&self) -> Vec<(NodeId, NodeId, EdgeKind)> {
        let mut edges: BTreeSet<(NodeId, NodeId)> = BTreeSet::new();
        for (child, parents) in &self.parents {
            for parent in parents {
                edges.insert((parent.clone(), child.clone()));
            }
        }

        edges
            .into_iter()
            .map(|edge| {
                let kind = if self.data_edges.contains(&edge) {
                    EdgeKind::Data
                } else {
                    EdgeKind::Manual
                };
                (edge.0, edge.1, kind)
            })
            .collect()
    }

    /// Physical location of a registered artifact as seen from the parent
    /// graph, or `None` if it stays inside a sub-workflow.
    pub fn locate(&self, lfn: &str) -> Option<CatalogEntry> {
        let record = self.registry.get(lfn)?;

        match &record.origin {
            Origin::Seed { local, .. } => Some(CatalogEntry {
                pfn: local.display().to_string(),
                site: self.config.site.clone(),
            }),
            Origin::Produced(producer) => {
                let staged = self
                    .node(producer)
                    .and_then(Node::subworkflow)
                    .map_or(true, |spec| spec.stages_out(lfn));
                if !staged {
                    return None;
                }

                Some(CatalogEntry {
                    pfn: record
                        .artifact
                        .physical_path(&self.config.output_dir)
                        .display()
                        .to_string(),
                    site: self.config.site.clone(),
                })
            }
        }
    }

    /// Catalog of every artifact materialized in the parent's storage.
    pub fn catalog(&self) -> FileCatalog {
        let mut catalog = FileCatalog::new();
        for (lfn, _) in self.registry.iter() {
            if let Some(entry) = self.locate(lfn) {
                catalog.insert(lfn.clone(), entry.pfn, entry.site);
            }
        }
        catalog
    }

    /// Catalog handed to a sub-workflow: its boundary inputs that the
    /// parent can locate.
    pub fn subworkflow_catalog(&self, id: &NodeId) -> Result<FileCatalog> {
        let node = self
            .node(id)
            .ok_or_else(|| PlanError::UnknownNode(id.to_string()))?;
        let spec = node.subworkflow().ok_or_else(|| {
            PlanError::UnsupportedConfiguration(format!("'{}' is not a sub-workflow", id))
        })?;

        let mut catalog = FileCatalog::new();
        for input in &spec.boundary_inputs {
            let lfn = input.lfn();
            if let Some(entry) = self.locate(&lfn) {
                catalog.insert(lfn, entry.pfn, entry.site);
            }
        }
        Ok(catalog)
    }
}

/// Node id prefix derived from a node name.
fn id_prefix(name: &str) -> String {
    let prefix: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if prefix.is_empty() {
        "node".to_string()
    } else {
        prefix
    }
}

/// Strips nodes that only lead out of the cycles, leaving the nodes that lie
/// on (or between) cycles.
fn cycle_members(
    mut remaining: BTreeSet<&NodeId>,
    children: &HashMap<&NodeId, Vec<&NodeId>>,
) -> Vec<String> {
    loop {
        let dangling: Vec<&NodeId> = remaining
            .iter()
            .copied()
            .filter(|id| {
                children
                    .get(id)
                    .into_iter()
                    .flatten()
                    .all(|child| !remaining.contains(child))
            })
            .collect();

        if dangling.is_empty() {
            break;
        }
        for id in dangling {
            remaining.remove(id);
        }
    }

    remaining.into_iter().map(NodeId::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::artifact::Segment;
    use crate::workflow::node::Executable;
    use crate::workflow::subworkflow::SubWorkflow;
    use std::fs;
    use tempfile::tempdir;

    fn seg() -> Segment {
        Segment::new(1000, 1100)
    }

    fn exe(name: &str) -> Executable {
        Executable::new(name, format!("/usr/bin/{}", name), "H1L1", "out")
    }

    /// Adds a job producing one artifact tagged `tag`.
    fn producer(graph: &mut WorkflowGraph, name: &str, tag: &str) -> (NodeId, Artifact) {
        let mut node = exe(name).create_node();
        let output = node.new_output_file_opt(seg(), ".hdf", "--output-file", &[tag]);
        (graph.add(node).unwrap(), output)
    }

    /// Adds a generator job writing a sub-workflow's DAG and catalog map.
    fn generator(graph: &mut WorkflowGraph, tag: &str) -> (Artifact, Artifact) {
        let mut node = exe("make_subdag").create_node();
        let dag = node.new_output_file_opt(seg(), ".dag.yml", "--output-dag", &[tag]);
        let map = node.new_output_file_opt(seg(), ".map", "--output-map", &[tag]);
        graph.add(node).unwrap();
        (dag, map)
    }

    fn posterior(tag: &str) -> Artifact {
        Artifact::new("H1L1", "inference", seg(), ".hdf", "results").with_tags(&[tag])
    }

    #[test]
    fn test_add_assigns_sequential_ids() {
        let mut graph = WorkflowGraph::new("test");
        let (a, _) = producer(&mut graph, "gen", "a");
        let (b, _) = producer(&mut graph, "plot-posterior", "b");

        assert_eq!(a.as_str(), "gen_ID000001");
        assert_eq!(b.as_str(), "plot_posterior_ID000002");
        assert_eq!(graph.node(&a).unwrap().id(), Some(&a));
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_edges_inferred_from_artifacts() {
        let mut graph = WorkflowGraph::new("test");
        let (gen_x, x) = producer(&mut graph, "gen", "a");

        let mut consumer = exe("consume").create_node();
        consumer.add_input_opt("--input-file", &x);
        let c = graph.add(consumer).unwrap();

        assert!(graph.has_edge(&gen_x, &c));
        assert_eq!(graph.parents(&c), vec![&gen_x]);
        assert_eq!(graph.children(&gen_x), vec![&c]);
        assert_eq!(graph.edges(), vec![(gen_x, c, EdgeKind::Data)]);
    }

    #[test]
    fn test_unknown_producer_fails() {
        let mut graph = WorkflowGraph::new("test");
        let orphan = Artifact::new("H1", "orphan", seg(), ".txt", "out");

        let mut node = exe("consume").create_node();
        node.add_input_opt("--input-file", &orphan);

        let result = graph.add(node);
        assert!(matches!(result, Err(PlanError::UnknownProducer { .. })));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_seed_input_needs_no_producer() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("config.ini");
        fs::write(&file, "[model]").unwrap();

        let mut graph = WorkflowGraph::new("test");
        let config = Artifact::new("H1L1", "config", seg(), ".ini", "seeds");
        graph.add_seed(&config, file.to_str().unwrap()).unwrap();

        let mut node = exe("consume").create_node();
        node.add_input_opt("--config-file", &config);
        let id = graph.add(node).unwrap();

        assert!(graph.parents(&id).is_empty());
        let entry = graph.locate(&config.lfn()).unwrap();
        assert_eq!(PathBuf::from(entry.pfn), fs::canonicalize(&file).unwrap());
    }

    #[test]
    fn test_duplicate_producer_fails_and_leaves_graph_unchanged() {
        let mut graph = WorkflowGraph::new("test");
        let (first, x) = producer(&mut graph, "gen", "a");

        let mut second = exe("other").create_node();
        second.add_output_opt("--output-file", &x);

        match graph.add(second) {
            Err(PlanError::DuplicateArtifact { existing, .. }) => {
                assert_eq!(existing, first.to_string())
            }
            other => panic!("expected DuplicateArtifact, got {:?}", other),
        }
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_manual_dependency() {
        let mut graph = WorkflowGraph::new("test");
        let (a, _) = producer(&mut graph, "gen", "a");
        let (b, _) = producer(&mut graph, "gen", "b");

        graph.add_dependency(&a, &b).unwrap();

        assert!(graph.has_edge(&a, &b));
        assert_eq!(graph.edges(), vec![(a, b, EdgeKind::Manual)]);
    }

    #[test]
    fn test_manual_dependency_on_data_edge_stays_data() {
        let mut graph = WorkflowGraph::new("test");
        let (a, x) = producer(&mut graph, "gen", "a");
        let mut consumer = exe("consume").create_node();
        consumer.add_input(&x);
        let b = graph.add(consumer).unwrap();

        graph.add_dependency(&a, &b).unwrap();
        assert_eq!(graph.edges(), vec![(a, b, EdgeKind::Data)]);
    }

    #[test]
    fn test_manual_dependency_unknown_node() {
        let mut graph = WorkflowGraph::new("test");
        let (a, _) = producer(&mut graph, "gen", "a");

        let result = graph.add_dependency(&a, &NodeId::from("ghost_ID000009"));
        assert!(matches!(result, Err(PlanError::UnknownNode(id)) if id == "ghost_ID000009"));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut graph = WorkflowGraph::new("test");
        let (a, _) = producer(&mut graph, "gen", "a");

        let result = graph.add_dependency(&a, &a);
        assert!(matches!(result, Err(PlanError::CycleDetected { .. })));
    }

    #[test]
    fn test_validate_detects_cycle_naming_both_nodes() {
        let mut graph = WorkflowGraph::new("test");
        let (a, _) = producer(&mut graph, "gen", "a");
        let (b, _) = producer(&mut graph, "gen", "b");
        let (c, _) = producer(&mut graph, "gen", "c");

        graph.add_dependency(&a, &b).unwrap();
        graph.add_dependency(&b, &a).unwrap();
        graph.add_dependency(&b, &c).unwrap();

        match graph.validate() {
            Err(PlanError::CycleDetected { nodes }) => {
                assert_eq!(nodes, vec![a.to_string(), b.to_string()]);
            }
            other => panic!("expected CycleDetected, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_returns_topological_order() {
        let mut graph = WorkflowGraph::new("test");
        let (a, x) = producer(&mut graph, "gen", "a");
        let (b, _) = producer(&mut graph, "gen", "b");

        let mut consumer = exe("consume").create_node();
        consumer.add_input(&x);
        let c = graph.add(consumer).unwrap();
        graph.add_dependency(&c, &b).unwrap();

        assert_eq!(graph.validate().unwrap(), vec![a.clone(), c.clone(), b.clone()]);
        assert_eq!(graph.topological_order().unwrap(), vec![a, c, b]);
    }

    #[test]
    fn test_finalized_graph_rejects_changes() {
        let mut graph = WorkflowGraph::new("test");
        let (a, _) = producer(&mut graph, "gen", "a");
        let (b, _) = producer(&mut graph, "gen", "b");
        graph.finalize().unwrap();

        assert!(graph.is_finalized());
        assert!(matches!(
            graph.add(exe("late").create_node()),
            Err(PlanError::AlreadyFinalized(_))
        ));
        assert!(matches!(
            graph.add_dependency(&a, &b),
            Err(PlanError::AlreadyFinalized(_))
        ));
        assert!(matches!(graph.finalize(), Err(PlanError::AlreadyFinalized(_))));
    }

    #[test]
    fn test_subworkflow_boundary_edges() {
        let mut graph = WorkflowGraph::new("test");
        let (dag_a, map_a) = generator(&mut graph, "a");
        let (dag_b, map_b) = generator(&mut graph, "b");
        let x = posterior("a");

        let mut sub_a = SubWorkflow::new("inference_a", &dag_a);
        sub_a.set_subworkflow_properties(&map_a, "local", "a.cache");
        sub_a.add_outputs(&[&x], true);
        let a = sub_a.add_into_workflow(&mut graph).unwrap();

        let mut sub_b = SubWorkflow::new("inference_b", &dag_b);
        sub_b.set_subworkflow_properties(&map_b, "local", "b.cache");
        sub_b.add_inputs(&[&x]);
        let b = sub_b.add_into_workflow(&mut graph).unwrap();

        assert!(graph.has_edge(&a, &b));
        assert_eq!(graph.parents(&a), vec![&NodeId::from("make_subdag_ID000001")]);

        let catalog = graph.subworkflow_catalog(&b).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains(&x.lfn()));
    }

    #[test]
    fn test_unstaged_boundary_output_strict() {
        let mut graph = WorkflowGraph::new("test");
        let (dag_a, _) = generator(&mut graph, "a");
        let (dag_b, _) = generator(&mut graph, "b");
        let x = posterior("a");

        let mut sub_a = SubWorkflow::new("inference_a", &dag_a);
        sub_a.add_outputs(&[&x], false);
        sub_a.add_into_workflow(&mut graph).unwrap();

        let mut sub_b = SubWorkflow::new("inference_b", &dag_b);
        sub_b.add_inputs(&[&x]);
        let result = sub_b.add_into_workflow(&mut graph);

        assert!(matches!(result, Err(PlanError::UnstagedBoundaryOutput { .. })));
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_unstaged_boundary_output_permissive_omits_catalog_entry() {
        let mut graph = WorkflowGraph::new("test");
        graph.set_staging_policy(StagingPolicy::Permissive);
        let (dag_a, _) = generator(&mut graph, "a");
        let (dag_b, _) = generator(&mut graph, "b");
        let x = posterior("a");

        let mut sub_a = SubWorkflow::new("inference_a", &dag_a);
        sub_a.add_outputs(&[&x], false);
        let a = sub_a.add_into_workflow(&mut graph).unwrap();

        let mut sub_b = SubWorkflow::new("inference_b", &dag_b);
        sub_b.add_inputs(&[&x]);
        let b = sub_b.add_into_workflow(&mut graph).unwrap();

        assert!(graph.has_edge(&a, &b));
        assert!(!graph.subworkflow_catalog(&b).unwrap().contains(&x.lfn()));
        assert!(!graph.catalog().contains(&x.lfn()));
    }

    #[test]
    fn test_job_consuming_subworkflow_output_is_unsupported() {
        let mut graph = WorkflowGraph::new("test");
        let (dag, _) = generator(&mut graph, "a");
        let x = posterior("a");

        let mut sub = SubWorkflow::new("inference_a", &dag);
        sub.add_outputs(&[&x], true);
        sub.add_into_workflow(&mut graph).unwrap();

        let mut plot = exe("plot").create_node();
        plot.add_input_opt("--input-file", &x);

        let result = graph.add(plot);
        assert!(matches!(result, Err(PlanError::UnsupportedConfiguration(_))));
    }

    #[test]
    fn test_subworkflow_catalog_rejects_plain_job() {
        let mut graph = WorkflowGraph::new("test");
        let (a, _) = producer(&mut graph, "gen", "a");

        assert!(matches!(
            graph.subworkflow_catalog(&a),
            Err(PlanError::UnsupportedConfiguration(_))
        ));
        assert!(matches!(
            graph.subworkflow_catalog(&NodeId::from("nope")),
            Err(PlanError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_catalog_anchors_at_output_dir() {
        let mut config = PlanConfig::named("test");
        config.output_dir = PathBuf::from("/data/run");
        let mut graph = WorkflowGraph::with_config(config);
        let (_, x) = producer(&mut graph, "gen", "a");

        let catalog = graph.catalog();
        let entry = catalog.get(&x.lfn()).unwrap();
        assert_eq!(entry.pfn, "/data/run/out/H1L1-GEN_A-1000-100.hdf");
        assert_eq!(entry.site, "local");
        assert_eq!(
            graph.registry().resolve(&x.lfn()).unwrap(),
            PathBuf::from(&entry.pfn)
        );

        graph.set_output_dir("/data/other").unwrap();
        assert_eq!(
            graph.registry().resolve(&x.lfn()).unwrap(),
            PathBuf::from("/data/other/out/H1L1-GEN_A-1000-100.hdf")
        );
    }

    #[test]
    fn test_independent_graphs_do_not_share_state() {
        let mut first = WorkflowGraph::new("first");
        let mut second = WorkflowGraph::new("second");

        let (a, _) = producer(&mut first, "gen", "a");
        let (b, _) = producer(&mut second, "gen", "a");

        assert_eq!(a, b);
        assert_eq!(first.registry().len(), 1);
        assert_eq!(second.registry().len(), 1);
    }
}
