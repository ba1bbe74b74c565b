//! Factories: long-lived blueprints that produce node instances on demand.
//!
//! A [`NodeFactory`] names an external implementation (module path + symbol)
//! and its declared ports. A [`CompositeNodeFactory`] holds a blueprint graph
//! of references to other factories; instantiating it resolves every
//! reference through the catalog and materializes the graph recursively,
//! guarding against cross-blueprint recursion with an explicit call stack.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::catalog::{ComputeResolver, FactoryCatalog};
use crate::error::DataflowError;
use crate::model::composite::{CompositeNode, Connection, Endpoint};
use crate::model::node::{AnyNode, Node};
use crate::model::port::{PortDescriptor, PortType};
use crate::observer::{Listener, NodeEvent, Subject};

/// Reference to a factory by catalog position: `(namespace, name)`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FactoryRef {
    pub namespace: String,
    pub name: String,
}

impl FactoryRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FactoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// The collaborators a factory needs while instantiating.
pub struct InstantiationContext<'a> {
    pub catalog: &'a dyn FactoryCatalog,
    pub resolver: &'a dyn ComputeResolver,
}

/// The set of composite factories currently being instantiated on this call
/// path. Immutable per call: recursing extends a copy, so sibling branches
/// never observe each other's state.
#[derive(Clone, Debug, Default)]
pub struct CallStack {
    active: HashSet<String>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.active.contains(name)
    }

    /// A copy of this stack with `name` added.
    pub fn with(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.active.insert(name.to_string());
        next
    }
}

/// Blueprint for an atomic node backed by an external implementation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NodeFactory {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    /// Module path of the implementation, resolved by the compute resolver.
    pub module: String,
    /// Symbol inside the module.
    pub symbol: String,
    #[serde(default)]
    pub inputs: Vec<PortDescriptor>,
    #[serde(default)]
    pub outputs: Vec<PortDescriptor>,
    /// Directories an external loader would search for `module`; opaque to
    /// the core, carried for the round-trip contract.
    #[serde(default)]
    pub search_path: Vec<String>,
    /// Namespace of the package this factory is registered under.
    #[serde(default)]
    pub package: Option<String>,
    #[serde(skip)]
    observers: Subject,
}

impl NodeFactory {
    pub fn new(name: &str, module: &str, symbol: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            category: String::new(),
            module: module.to_string(),
            symbol: symbol.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            search_path: Vec::new(),
            package: None,
            observers: Subject::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn with_input(mut self, descriptor: PortDescriptor) -> Self {
        self.inputs.push(descriptor);
        self
    }

    pub fn with_output(mut self, descriptor: PortDescriptor) -> Self {
        self.outputs.push(descriptor);
        self
    }

    pub fn get_id(&self) -> &str {
        &self.name
    }

    /// Human-readable description block.
    pub fn get_tip(&self) -> String {
        format!(
            "Name : {}\nCategory : {}\nDescription : {}\n",
            self.name, self.category, self.description
        )
    }

    pub fn subscribe(&mut self, listener: Arc<dyn Listener>) {
        self.observers.subscribe(listener);
    }

    fn factory_ref(&self) -> FactoryRef {
        FactoryRef::new(self.package.clone().unwrap_or_default(), self.name.clone())
    }

    /// Build a node instance: resolve the implementation reference, wrap it
    /// into the uniform compute contract, declare the ports, attach the
    /// factory reference.
    pub fn instantiate(&self, ctx: &InstantiationContext<'_>) -> Result<Node, DataflowError> {
        let compute = ctx.resolver.resolve(&self.module, &self.symbol)?;

        let mut node = Node::with_compute(compute);
        for descriptor in &self.inputs {
            node.add_input(
                &descriptor.name,
                descriptor.port_type,
                descriptor.default_value.clone(),
            )?;
        }
        for descriptor in &self.outputs {
            node.add_output(&descriptor.name, descriptor.port_type)?;
        }
        // a factory without declared outputs still produces one slot
        if self.outputs.is_empty() {
            node.add_output("out", PortType::Any)?;
        }

        node.set_caption(&self.name);
        node.set_factory(Some(self.factory_ref()));
        Ok(node)
    }

    pub fn save(&self) -> Result<String, DataflowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(json: &str) -> Result<Self, DataflowError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A blueprint member: local id plus the factory it references.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MemberRef {
    pub id: String,
    pub factory: FactoryRef,
}

/// Blueprint for a composite node: member references and the connection edge
/// set over them, including boundary edges.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CompositeNodeFactory {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub package: Option<String>,
    nb_input: usize,
    nb_output: usize,
    members: Vec<MemberRef>,
    connections: Vec<Connection>,
    #[serde(skip)]
    observers: Subject,
}

impl CompositeNodeFactory {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            category: String::new(),
            package: None,
            nb_input: 0,
            nb_output: 0,
            members: Vec::new(),
            connections: Vec::new(),
            observers: Subject::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn get_id(&self) -> &str {
        &self.name
    }

    pub fn get_tip(&self) -> String {
        format!(
            "Name : {}\nCategory : {}\nDescription : {}\n",
            self.name, self.category, self.description
        )
    }

    /// Declare the composite's external input port count. Must precede any
    /// connection referencing a boundary-in index at or past the old count.
    pub fn set_nb_input(&mut self, n: usize) {
        self.nb_input = n;
    }

    pub fn set_nb_output(&mut self, n: usize) {
        self.nb_output = n;
    }

    pub fn nb_input(&self) -> usize {
        self.nb_input
    }

    pub fn nb_output(&self) -> usize {
        self.nb_output
    }

    pub fn members(&self) -> &[MemberRef] {
        &self.members
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Drop all members and connections, keeping identity metadata.
    pub fn clear(&mut self) {
        self.members.clear();
        self.connections.clear();
        self.observers.notify(NodeEvent::DataModified);
    }

    pub fn subscribe(&mut self, listener: Arc<dyn Listener>) {
        self.observers.subscribe(listener);
    }

    /// Register an unresolved member reference under `local_id`; the id is
    /// returned for use in [`add_connection`](Self::add_connection).
    pub fn add_nodefactory(
        &mut self,
        local_id: impl Into<String>,
        factory: FactoryRef,
    ) -> Result<String, DataflowError> {
        let id = local_id.into();
        if self.members.iter().any(|m| m.id == id) {
            return Err(DataflowError::DuplicateNode(id));
        }
        self.members.push(MemberRef {
            id: id.clone(),
            factory,
        });
        self.observers.notify(NodeEvent::DataModified);
        Ok(id)
    }

    /// Record a directed edge. Boundary indices are validated against the
    /// declared counts immediately; member port existence is only validated
    /// at instantiation time, against each referenced factory's real ports.
    pub fn add_connection(
        &mut self,
        src: Endpoint,
        src_port: usize,
        dst: Endpoint,
        dst_port: usize,
    ) -> Result<(), DataflowError> {
        match &src {
            Endpoint::BoundaryOut => {
                return Err(DataflowError::port_address(
                    "boundary output cannot be a connection source",
                ));
            }
            Endpoint::BoundaryIn if src_port >= self.nb_input => {
                return Err(DataflowError::PortAddress(format!(
                    "boundary input {} out of range ({} declared)",
                    src_port, self.nb_input
                )));
            }
            Endpoint::Node(id) if !self.members.iter().any(|m| &m.id == id) => {
                return Err(DataflowError::NodeNotFound(id.clone()));
            }
            _ => {}
        }
        match &dst {
            Endpoint::BoundaryIn => {
                return Err(DataflowError::port_address(
                    "boundary input cannot be a connection destination",
                ));
            }
            Endpoint::BoundaryOut if dst_port >= self.nb_output => {
                return Err(DataflowError::PortAddress(format!(
                    "boundary output {} out of range ({} declared)",
                    dst_port, self.nb_output
                )));
            }
            Endpoint::Node(id) if !self.members.iter().any(|m| &m.id == id) => {
                return Err(DataflowError::NodeNotFound(id.clone()));
            }
            _ => {}
        }

        self.connections
            .push(Connection::new(src, src_port, dst, dst_port));
        self.observers.notify(NodeEvent::DataModified);
        Ok(())
    }

    pub fn instantiate(
        &self,
        ctx: &InstantiationContext<'_>,
    ) -> Result<CompositeNode, DataflowError> {
        self.instantiate_with(ctx, &CallStack::new())
    }

    /// Materialize the blueprint. Fails with `Recursion` — allocating
    /// nothing — when this factory is already on the instantiation path;
    /// lookup and wiring errors abort the whole call.
    pub fn instantiate_with(
        &self,
        ctx: &InstantiationContext<'_>,
        call_stack: &CallStack,
    ) -> Result<CompositeNode, DataflowError> {
        if call_stack.contains(&self.name) {
            return Err(DataflowError::Recursion(self.name.clone()));
        }
        let stack = call_stack.with(&self.name);

        debug!(
            "instantiating composite factory '{}' ({} members, {} connections)",
            self.name,
            self.members.len(),
            self.connections.len()
        );

        let mut composite = CompositeNode::new(self.nb_input, self.nb_output);
        composite.base_mut().set_caption(&self.name);

        for member in &self.members {
            let factory = ctx
                .catalog
                .lookup(&member.factory.namespace, &member.factory.name)?;
            let node = factory.instantiate_with(ctx, &stack)?;
            composite.add_node_with_id(member.id.clone(), node)?;
        }
        for connection in &self.connections {
            composite.connect(
                connection.src.clone(),
                connection.src_port,
                connection.dst.clone(),
                connection.dst_port,
            )?;
        }

        composite.base_mut().set_factory(Some(FactoryRef::new(
            self.package.clone().unwrap_or_default(),
            self.name.clone(),
        )));
        Ok(composite)
    }

    pub fn save(&self) -> Result<String, DataflowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(json: &str) -> Result<Self, DataflowError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A catalog entry: atomic node factory or composite blueprint.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnyFactory {
    Node(NodeFactory),
    Composite(CompositeNodeFactory),
}

impl AnyFactory {
    pub fn name(&self) -> &str {
        match self {
            AnyFactory::Node(f) => &f.name,
            AnyFactory::Composite(f) => &f.name,
        }
    }

    pub fn get_tip(&self) -> String {
        match self {
            AnyFactory::Node(f) => f.get_tip(),
            AnyFactory::Composite(f) => f.get_tip(),
        }
    }

    pub(crate) fn set_package(&mut self, namespace: &str) {
        match self {
            AnyFactory::Node(f) => f.package = Some(namespace.to_string()),
            AnyFactory::Composite(f) => f.package = Some(namespace.to_string()),
        }
    }

    pub fn instantiate(&self, ctx: &InstantiationContext<'_>) -> Result<AnyNode, DataflowError> {
        self.instantiate_with(ctx, &CallStack::new())
    }

    pub fn instantiate_with(
        &self,
        ctx: &InstantiationContext<'_>,
        call_stack: &CallStack,
    ) -> Result<AnyNode, DataflowError> {
        match self {
            AnyFactory::Node(f) => Ok(AnyNode::Atomic(f.instantiate(ctx)?)),
            AnyFactory::Composite(f) => {
                Ok(AnyNode::Composite(f.instantiate_with(ctx, call_stack)?))
            }
        }
    }
}

impl From<NodeFactory> for AnyFactory {
    fn from(factory: NodeFactory) -> Self {
        AnyFactory::Node(factory)
    }
}

impl From<CompositeNodeFactory> for AnyFactory {
    fn from(factory: CompositeNodeFactory) -> Self {
        AnyFactory::Composite(factory)
    }
}
