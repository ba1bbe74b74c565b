//! Node: the atomic executable unit of a dataflow graph.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::DataflowError;
use crate::model::composite::CompositeNode;
use crate::model::factory::FactoryRef;
use crate::model::port::{PortKey, PortSet, PortState, PortType, PortValue};
use crate::observer::{Listener, NodeEvent, Subject};

/// Uniform compute signature: ordered input values in, ordered output values
/// out. Results are copied into the output ports positionally, up to
/// `min(result.len(), outputs.len())`.
pub type ComputeFn =
    Arc<dyn Fn(&[PortValue]) -> Result<Vec<PortValue>, DataflowError> + Send + Sync>;

/// A stateful compute implementation (functor object).
pub trait ComputeStep: Send {
    fn compute(&mut self, inputs: &[PortValue]) -> Result<Vec<PortValue>, DataflowError>;
}

/// The closed set of compute capabilities a node can carry, selected at
/// construction time. Nested graphs are not a variant here — they are the
/// [`AnyNode::Composite`] arm, which runs its own subgraph when evaluated.
pub enum Compute {
    Function(ComputeFn),
    Stateful(Box<dyn ComputeStep>),
}

impl Compute {
    pub fn function(
        f: impl Fn(&[PortValue]) -> Result<Vec<PortValue>, DataflowError> + Send + Sync + 'static,
    ) -> Self {
        Compute::Function(Arc::new(f))
    }

    /// Convenience wrapper for single-output functions.
    pub fn scalar_fn(
        f: impl Fn(&[PortValue]) -> Result<PortValue, DataflowError> + Send + Sync + 'static,
    ) -> Self {
        Compute::Function(Arc::new(move |inputs| Ok(vec![f(inputs)?])))
    }

    pub fn stateful(step: impl ComputeStep + 'static) -> Self {
        Compute::Stateful(Box::new(step))
    }

    fn run(&mut self, inputs: &[PortValue]) -> Result<Vec<PortValue>, DataflowError> {
        match self {
            Compute::Function(f) => f(inputs),
            Compute::Stateful(step) => step.compute(inputs),
        }
    }
}

/// Atomic executable unit: ordered input/output ports, a dirty flag, a
/// metadata map, an optional back-reference to the factory that produced it,
/// and one compute capability.
pub struct Node {
    inputs: PortSet,
    outputs: PortSet,
    modified: bool,
    metadata: HashMap<String, PortValue>,
    factory: Option<FactoryRef>,
    compute: Option<Compute>,
    observers: Subject,
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl Node {
    pub fn new() -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("caption".to_string(), PortValue::from("node"));
        Self {
            inputs: PortSet::default(),
            outputs: PortSet::default(),
            modified: true,
            metadata,
            factory: None,
            compute: None,
            observers: Subject::new(),
        }
    }

    pub fn with_compute(compute: Compute) -> Self {
        let mut node = Self::new();
        node.compute = Some(compute);
        node
    }

    pub fn set_compute(&mut self, compute: Compute) {
        self.compute = Some(compute);
    }

    // Declarations

    /// Create an input port. The index is permanent; duplicate names fail.
    pub fn add_input(
        &mut self,
        name: &str,
        port_type: PortType,
        default: Option<PortValue>,
    ) -> Result<usize, DataflowError> {
        let index = self.inputs.add(name, port_type)?;
        if let Some(value) = default {
            self.inputs.write(index, value);
        }
        Ok(index)
    }

    /// Create an output port.
    pub fn add_output(&mut self, name: &str, port_type: PortType) -> Result<usize, DataflowError> {
        self.outputs.add(name, port_type)
    }

    pub fn nb_input(&self) -> usize {
        self.inputs.len()
    }

    pub fn nb_output(&self) -> usize {
        self.outputs.len()
    }

    pub fn inputs(&self) -> &PortSet {
        &self.inputs
    }

    pub fn outputs(&self) -> &PortSet {
        &self.outputs
    }

    // I/O

    pub fn get_input<'k>(&self, key: impl Into<PortKey<'k>>) -> Result<&PortValue, DataflowError> {
        self.inputs.value(key.into())
    }

    /// Store an input value. When it differs (by equality) from the current
    /// value the node is marked dirty and `InputModified` is emitted;
    /// otherwise this is a no-op.
    pub fn set_input<'k>(
        &mut self,
        key: impl Into<PortKey<'k>>,
        value: impl Into<PortValue>,
    ) -> Result<(), DataflowError> {
        if let Some(index) = self.inputs.set_value(key.into(), value.into())? {
            self.unvalidate_input(index);
        }
        Ok(())
    }

    pub fn get_output<'k>(&self, key: impl Into<PortKey<'k>>) -> Result<&PortValue, DataflowError> {
        self.outputs.value(key.into())
    }

    pub fn set_output<'k>(
        &mut self,
        key: impl Into<PortKey<'k>>,
        value: impl Into<PortValue>,
    ) -> Result<(), DataflowError> {
        self.outputs.set_value(key.into(), value.into())?;
        Ok(())
    }

    pub fn get_input_state<'k>(
        &self,
        key: impl Into<PortKey<'k>>,
    ) -> Result<Option<PortState>, DataflowError> {
        self.inputs.state(key.into())
    }

    /// Store an input state tag; always unvalidates the node.
    pub fn set_input_state<'k>(
        &mut self,
        key: impl Into<PortKey<'k>>,
        state: Option<PortState>,
    ) -> Result<(), DataflowError> {
        let index = self.inputs.set_state(key.into(), state)?;
        self.unvalidate_input(index);
        Ok(())
    }

    pub fn get_input_index<'k>(&self, key: impl Into<PortKey<'k>>) -> Result<usize, DataflowError> {
        self.inputs.resolve(key.into())
    }

    // Status

    fn unvalidate_input(&mut self, index: usize) {
        self.modified = true;
        self.observers.notify(NodeEvent::InputModified(index));
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    // Metadata

    pub fn caption(&self) -> &str {
        self.metadata
            .get("caption")
            .and_then(|v| v.as_str())
            .unwrap_or("")
    }

    pub fn set_caption(&mut self, caption: &str) {
        self.metadata
            .insert("caption".to_string(), PortValue::from(caption));
        self.observers.notify(NodeEvent::CaptionModified);
    }

    pub fn get_data(&self, key: &str) -> Option<&PortValue> {
        self.metadata.get(key)
    }

    pub fn set_data(&mut self, key: &str, value: impl Into<PortValue>) {
        self.metadata.insert(key.to_string(), value.into());
        self.observers.notify(NodeEvent::DataModified);
    }

    pub fn factory(&self) -> Option<&FactoryRef> {
        self.factory.as_ref()
    }

    pub fn set_factory(&mut self, factory: Option<FactoryRef>) {
        self.factory = factory;
    }

    pub fn subscribe(&mut self, listener: Arc<dyn Listener>) {
        self.observers.subscribe(listener);
    }

    pub(crate) fn notify(&self, event: NodeEvent) {
        self.observers.notify(event);
    }

    // Evaluation

    /// Run the compute capability if the node is dirty.
    ///
    /// The dirty flag is cleared before the compute step runs, so re-entrant
    /// invalidations during compute cannot loop. Results are copied into the
    /// output ports in order, up to `min(result.len(), outputs.len())`.
    /// Returns `Ok(true)` when the compute step ran.
    pub fn evaluate(&mut self) -> Result<bool, DataflowError> {
        if !self.modified {
            return Ok(false);
        }
        self.modified = false;

        let inputs = self.inputs.values();
        let result = match self.compute.as_mut() {
            Some(compute) => compute.run(&inputs)?,
            None => Vec::new(),
        };

        let count = result.len().min(self.outputs.len());
        for (index, value) in result.into_iter().take(count).enumerate() {
            self.outputs.write(index, value);
        }

        self.observers.notify(NodeEvent::StatusModified(false));
        Ok(true)
    }
}

/// A member of a composite graph: either an atomic node or a nested
/// composite. This is the dispatch seam that lets a whole subgraph stand in
/// for an ordinary node.
pub enum AnyNode {
    Atomic(Node),
    Composite(CompositeNode),
}

impl std::fmt::Debug for AnyNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnyNode::Atomic(_) => f.write_str("AnyNode::Atomic"),
            AnyNode::Composite(_) => f.write_str("AnyNode::Composite"),
        }
    }
}

impl AnyNode {
    /// The node-typed view: for composites this is the boundary node carrying
    /// the external ports.
    pub fn as_node(&self) -> &Node {
        match self {
            AnyNode::Atomic(node) => node,
            AnyNode::Composite(composite) => composite.base(),
        }
    }

    pub fn as_node_mut(&mut self) -> &mut Node {
        match self {
            AnyNode::Atomic(node) => node,
            AnyNode::Composite(composite) => composite.base_mut(),
        }
    }

    pub fn as_composite(&self) -> Option<&CompositeNode> {
        match self {
            AnyNode::Composite(composite) => Some(composite),
            AnyNode::Atomic(_) => None,
        }
    }

    pub fn as_composite_mut(&mut self) -> Option<&mut CompositeNode> {
        match self {
            AnyNode::Composite(composite) => Some(composite),
            AnyNode::Atomic(_) => None,
        }
    }

    pub fn evaluate(&mut self) -> Result<bool, DataflowError> {
        match self {
            AnyNode::Atomic(node) => node.evaluate(),
            AnyNode::Composite(composite) => composite.evaluate(),
        }
    }
}

impl From<Node> for AnyNode {
    fn from(node: Node) -> Self {
        AnyNode::Atomic(node)
    }
}

impl From<CompositeNode> for AnyNode {
    fn from(composite: CompositeNode) -> Self {
        AnyNode::Composite(composite)
    }
}
