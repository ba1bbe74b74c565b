//! Dataflow graph engine: typed nodes with ordered ports, composite nodes
//! that wrap whole subgraphs behind a node interface, factories that act as
//! reusable blueprints, and a recursive memoized evaluation engine.
//!
//! The usual flow: register [`NodeFactory`]/[`CompositeNodeFactory`] entries
//! in a [`Catalog`] under package namespaces, register their implementations
//! in a [`SymbolTable`], instantiate a blueprint into a live
//! [`CompositeNode`], set external inputs and call
//! [`CompositeNode::evaluate`].

pub mod catalog;
pub mod error;
pub mod evaluation;
pub mod model;
pub mod observer;

pub use catalog::{Catalog, ComputeResolver, FactoryCatalog, Package, SymbolTable};
pub use error::DataflowError;
pub use model::composite::{CompositeNode, Connection, Endpoint};
pub use model::factory::{
    AnyFactory, CallStack, CompositeNodeFactory, FactoryRef, InstantiationContext, NodeFactory,
};
pub use model::node::{AnyNode, Compute, ComputeFn, ComputeStep, Node};
pub use model::port::{Port, PortDescriptor, PortKey, PortState, PortType, PortValue};
pub use observer::{Listener, NodeEvent, Subject};
