//! Composite node: a node implemented as an owned subgraph of member nodes
//! and directed connections.
//!
//! Boundary markers stand for the composite's own external ports. For graph
//! traversal they behave as zero-compute pass-through vertices: reading an
//! output of [`Endpoint::BoundaryIn`] reads the composite's external input,
//! and feeding [`Endpoint::BoundaryOut`] writes the composite's external
//! output.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DataflowError;
use crate::evaluation;
use crate::model::factory::CompositeNodeFactory;
use crate::model::node::{AnyNode, Node};
use crate::model::port::{PortKey, PortState, PortType, PortValue};
use crate::observer::NodeEvent;

/// Endpoint of a connection: a member node or one of the composite's
/// boundary markers.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// The composite's own external input ports (only ever a source).
    BoundaryIn,
    /// The composite's own external output ports (only ever a destination).
    BoundaryOut,
    /// A member node, by local id.
    Node(String),
}

impl Endpoint {
    pub fn node(id: impl Into<String>) -> Self {
        Endpoint::Node(id.into())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::BoundaryIn => write!(f, "<in>"),
            Endpoint::BoundaryOut => write!(f, "<out>"),
            Endpoint::Node(id) => write!(f, "'{}'", id),
        }
    }
}

/// A directed edge in the graph, from an output slot to an input slot.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Connection {
    pub id: Uuid,
    pub src: Endpoint,
    pub src_port: usize,
    pub dst: Endpoint,
    pub dst_port: usize,
}

impl Connection {
    pub fn new(src: Endpoint, src_port: usize, dst: Endpoint, dst_port: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            src,
            src_port,
            dst,
            dst_port,
        }
    }
}

/// A node implemented as an owned subgraph.
///
/// The `base` node carries the composite's external boundary ports, dirty
/// flag and metadata, so a composite is usable wherever a plain node is.
pub struct CompositeNode {
    base: Node,
    nodes: BTreeMap<String, AnyNode>,
    /// Edges in registration order — fan-in aggregation follows this order.
    /// Public for inspection; mutating it directly bypasses `connect`'s
    /// validation (the evaluation engine still detects cycles at runtime).
    pub connections: Vec<Connection>,
    next_id: u64,
}

impl CompositeNode {
    /// Create a composite with the given number of external boundary ports.
    pub fn new(nb_input: usize, nb_output: usize) -> Self {
        let mut base = Node::new();
        for i in 0..nb_input {
            base.add_input(&format!("in{}", i), PortType::Any, None)
                .expect("generated boundary port names are unique");
        }
        for i in 0..nb_output {
            base.add_output(&format!("out{}", i), PortType::Any)
                .expect("generated boundary port names are unique");
        }
        base.set_caption("composite");
        Self {
            base,
            nodes: BTreeMap::new(),
            connections: Vec::new(),
            next_id: 0,
        }
    }

    /// The composite seen as a plain node (external ports, dirty flag).
    pub fn base(&self) -> &Node {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut Node {
        &mut self.base
    }

    /// Set an external input value (delegates to the base node).
    pub fn set_input<'k>(
        &mut self,
        key: impl Into<PortKey<'k>>,
        value: impl Into<PortValue>,
    ) -> Result<(), DataflowError> {
        self.base.set_input(key, value)
    }

    /// Read an external output value (delegates to the base node).
    pub fn get_output<'k>(&self, key: impl Into<PortKey<'k>>) -> Result<&PortValue, DataflowError> {
        self.base.get_output(key)
    }

    // Graph editing

    /// Add a member node under a generated local id.
    pub fn add_node(&mut self, node: impl Into<AnyNode>) -> String {
        loop {
            let id = format!("node{}", self.next_id);
            self.next_id += 1;
            if !self.nodes.contains_key(&id) {
                self.nodes.insert(id.clone(), node.into());
                return id;
            }
        }
    }

    /// Add a member node under a caller-chosen local id.
    pub fn add_node_with_id(
        &mut self,
        id: impl Into<String>,
        node: impl Into<AnyNode>,
    ) -> Result<String, DataflowError> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(DataflowError::DuplicateNode(id));
        }
        self.nodes.insert(id.clone(), node.into());
        Ok(id)
    }

    pub fn get_node_by_id(&self, id: &str) -> Option<&AnyNode> {
        self.nodes.get(id)
    }

    pub fn get_node_by_id_mut(&mut self, id: &str) -> Option<&mut AnyNode> {
        self.nodes.get_mut(id)
    }

    /// Remove a member node along with every connection touching it.
    pub fn remove_node(&mut self, id: &str) -> Option<AnyNode> {
        let removed = self.nodes.remove(id)?;
        let endpoint = Endpoint::node(id);
        self.connections
            .retain(|c| c.src != endpoint && c.dst != endpoint);
        Some(removed)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&String, &AnyNode)> {
        self.nodes.iter()
    }

    /// Register a directed edge after validating it: endpoints and ports must
    /// exist, boundary markers must flow in the right direction, and the edge
    /// must not close a cycle.
    pub fn connect(
        &mut self,
        src: Endpoint,
        src_port: usize,
        dst: Endpoint,
        dst_port: usize,
    ) -> Result<Uuid, DataflowError> {
        if src == dst {
            return Err(DataflowError::Cycle(format!(
                "cannot connect {} to itself",
                src
            )));
        }
        if src == Endpoint::BoundaryOut {
            return Err(DataflowError::port_address(
                "boundary output cannot be a connection source",
            ));
        }
        if dst == Endpoint::BoundaryIn {
            return Err(DataflowError::port_address(
                "boundary input cannot be a connection destination",
            ));
        }

        let src_count = self.output_count(&src)?;
        if src_port >= src_count {
            return Err(DataflowError::PortAddress(format!(
                "source port {} out of range for {} ({} outputs)",
                src_port, src, src_count
            )));
        }
        let dst_count = self.input_count(&dst)?;
        if dst_port >= dst_count {
            return Err(DataflowError::PortAddress(format!(
                "destination port {} out of range for {} ({} inputs)",
                dst_port, dst, dst_count
            )));
        }

        if self.would_close_cycle(&src, &dst) {
            return Err(DataflowError::Cycle(format!(
                "connecting {} -> {} would close a cycle",
                src, dst
            )));
        }

        let connection = Connection::new(src, src_port, dst.clone(), dst_port);
        let id = connection.id;
        self.connections.push(connection);

        if let Endpoint::Node(node_id) = &dst {
            if let Some(node) = self.nodes.get_mut(node_id) {
                node.as_node_mut()
                    .set_input_state(dst_port, Some(PortState::Connected))?;
            }
        }
        Ok(id)
    }

    /// Remove a connection by id; returns whether one was removed.
    pub fn disconnect(&mut self, id: Uuid) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| c.id != id);
        self.connections.len() != before
    }

    /// True when `src` is already reachable from `dst` — adding the edge
    /// would then close a cycle. Breadth-first, like any reachability check.
    fn would_close_cycle(&self, src: &Endpoint, dst: &Endpoint) -> bool {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(dst.clone());

        while let Some(current) = queue.pop_front() {
            if &current == src {
                return true;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            for connection in &self.connections {
                if connection.src == current {
                    queue.push_back(connection.dst.clone());
                }
            }
        }
        false
    }

    // Vertex accessors used by the evaluation engine.

    /// All traversal vertices: boundary pass-through markers (when the
    /// composite declares external ports) plus every member node.
    pub fn vertices(&self) -> Vec<Endpoint> {
        let mut vertices = Vec::with_capacity(self.nodes.len() + 2);
        if self.base.nb_input() > 0 {
            vertices.push(Endpoint::BoundaryIn);
        }
        if self.base.nb_output() > 0 {
            vertices.push(Endpoint::BoundaryOut);
        }
        vertices.extend(self.nodes.keys().cloned().map(Endpoint::Node));
        vertices
    }

    pub fn out_degree(&self, vertex: &Endpoint) -> usize {
        self.connections.iter().filter(|c| &c.src == vertex).count()
    }

    /// Producers feeding `(vertex, port)`, in connection-registration order.
    pub(crate) fn producers_of(&self, vertex: &Endpoint, port: usize) -> Vec<(Endpoint, usize)> {
        self.connections
            .iter()
            .filter(|c| &c.dst == vertex && c.dst_port == port)
            .map(|c| (c.src.clone(), c.src_port))
            .collect()
    }

    pub(crate) fn input_count(&self, vertex: &Endpoint) -> Result<usize, DataflowError> {
        match vertex {
            Endpoint::BoundaryIn => Ok(0),
            Endpoint::BoundaryOut => Ok(self.base.nb_output()),
            Endpoint::Node(id) => self
                .nodes
                .get(id)
                .map(|n| n.as_node().nb_input())
                .ok_or_else(|| DataflowError::NodeNotFound(id.clone())),
        }
    }

    fn output_count(&self, vertex: &Endpoint) -> Result<usize, DataflowError> {
        match vertex {
            Endpoint::BoundaryIn => Ok(self.base.nb_input()),
            Endpoint::BoundaryOut => Ok(0),
            Endpoint::Node(id) => self
                .nodes
                .get(id)
                .map(|n| n.as_node().nb_output())
                .ok_or_else(|| DataflowError::NodeNotFound(id.clone())),
        }
    }

    pub(crate) fn read_output(
        &self,
        vertex: &Endpoint,
        port: usize,
    ) -> Result<PortValue, DataflowError> {
        match vertex {
            // pass-through: the composite's external input
            Endpoint::BoundaryIn => Ok(self.base.get_input(port)?.clone()),
            Endpoint::BoundaryOut => Ok(self.base.get_output(port)?.clone()),
            Endpoint::Node(id) => {
                let node = self
                    .nodes
                    .get(id)
                    .ok_or_else(|| DataflowError::NodeNotFound(id.clone()))?;
                Ok(node.as_node().get_output(port)?.clone())
            }
        }
    }

    pub(crate) fn write_input(
        &mut self,
        vertex: &Endpoint,
        port: usize,
        value: PortValue,
    ) -> Result<(), DataflowError> {
        match vertex {
            Endpoint::BoundaryIn => Err(DataflowError::port_address(
                "boundary input has no writable slots",
            )),
            // pass-through: the composite's external output
            Endpoint::BoundaryOut => self.base.set_output(port, value),
            Endpoint::Node(id) => {
                let node = self
                    .nodes
                    .get_mut(id)
                    .ok_or_else(|| DataflowError::NodeNotFound(id.clone()))?;
                node.as_node_mut().set_input(port, value)
            }
        }
    }

    /// Run a vertex's compute step. Boundary markers are zero-compute.
    pub(crate) fn run_vertex(&mut self, vertex: &Endpoint) -> Result<bool, DataflowError> {
        match vertex {
            Endpoint::BoundaryIn | Endpoint::BoundaryOut => Ok(false),
            Endpoint::Node(id) => {
                let node = self
                    .nodes
                    .get_mut(id)
                    .ok_or_else(|| DataflowError::NodeNotFound(id.clone()))?;
                node.evaluate()
            }
        }
    }

    // Evaluation entry points

    /// Run a full evaluation pass over the subgraph, unconditionally.
    /// Returns the number of vertices evaluated.
    pub fn call(&mut self) -> Result<usize, DataflowError> {
        evaluation::full_pass(self)
    }

    /// Selectively evaluate `target` and its upstream dependency chain only.
    /// With no target this is a full pass.
    pub fn eval_as_expression(
        &mut self,
        target: Option<&Endpoint>,
    ) -> Result<usize, DataflowError> {
        evaluation::selective_pass(self, target)
    }

    /// Evaluate the composite as a member of a parent graph: lazily runs the
    /// subgraph when the composite's own inputs changed. Boundary-in edges
    /// feed the external inputs to internal ports and boundary-out edges fill
    /// the external outputs.
    pub fn evaluate(&mut self) -> Result<bool, DataflowError> {
        if !self.base.is_modified() {
            return Ok(false);
        }
        self.base.set_modified(false);
        debug!("evaluating composite '{}' subgraph", self.base.caption());
        evaluation::full_pass(self)?;
        self.base.notify(NodeEvent::StatusModified(false));
        Ok(true)
    }

    /// Serialize the current members and connections into `target`'s
    /// blueprint form, preserving local ids, so that instantiating `target`
    /// reproduces an isomorphic graph. Fails when a member carries no factory
    /// reference.
    pub fn to_factory(&self, target: &mut CompositeNodeFactory) -> Result<(), DataflowError> {
        target.clear();
        target.set_nb_input(self.base.nb_input());
        target.set_nb_output(self.base.nb_output());

        for (id, node) in &self.nodes {
            let factory = node.as_node().factory().cloned().ok_or_else(|| {
                DataflowError::Instantiation(format!("member '{}' has no factory reference", id))
            })?;
            target.add_nodefactory(id.clone(), factory)?;
        }
        for connection in &self.connections {
            target.add_connection(
                connection.src.clone(),
                connection.src_port,
                connection.dst.clone(),
                connection.dst_port,
            )?;
        }
        Ok(())
    }
}
