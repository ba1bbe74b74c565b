//! End-to-end tests: catalogs, blueprints, instantiation and evaluation of
//! composite graphs.

use flowgraph::{
    AnyFactory, Catalog, Compute, CompositeNode, CompositeNodeFactory, DataflowError, Endpoint,
    FactoryCatalog, FactoryRef, InstantiationContext, NodeFactory, Package, PortDescriptor,
    PortType, PortValue, SymbolTable,
};

fn symbols() -> SymbolTable {
    let mut table = SymbolTable::new();
    table.register("library.builtins", "identity", || {
        Compute::scalar_fn(|inputs| Ok(inputs.first().cloned().unwrap_or(PortValue::Null)))
    });
    table.register("library.builtins", "add", || {
        Compute::scalar_fn(|inputs| {
            let a = inputs.first().and_then(|v| v.as_number()).unwrap_or(0.0);
            let b = inputs.get(1).and_then(|v| v.as_number()).unwrap_or(0.0);
            Ok(PortValue::from(a + b))
        })
    });
    table.register("library.builtins", "two_strings", || {
        Compute::function(|_| {
            Ok(vec![
                PortValue::from("teststring"),
                PortValue::from("teststring2"),
            ])
        })
    });
    table
}

fn float_factory() -> NodeFactory {
    NodeFactory::new("float", "library.builtins", "identity")
        .with_category("math")
        .with_input(
            PortDescriptor::new("value", PortType::Number).with_default(PortValue::from(0.0)),
        )
        .with_output(PortDescriptor::new("out", PortType::Number))
}

fn add_factory() -> NodeFactory {
    NodeFactory::new("add", "library.builtins", "add")
        .with_category("math")
        .with_input(PortDescriptor::new("a", PortType::Number))
        .with_input(PortDescriptor::new("b", PortType::Number))
        .with_output(PortDescriptor::new("sum", PortType::Number))
}

fn strings_factory() -> NodeFactory {
    NodeFactory::new("strings", "library.builtins", "two_strings")
        .with_output(PortDescriptor::new("first", PortType::String))
        .with_output(PortDescriptor::new("second", PortType::String))
}

fn passthrough_factory() -> NodeFactory {
    NodeFactory::new("passthrough", "library.builtins", "identity")
        .with_input(PortDescriptor::new("value", PortType::Any))
        .with_output(PortDescriptor::new("out", PortType::Any))
}

fn base_catalog() -> Catalog {
    let mut package = Package::new("library");
    package.add_factory(float_factory());
    package.add_factory(add_factory());
    package.add_factory(strings_factory());
    package.add_factory(passthrough_factory());

    let mut catalog = Catalog::new();
    catalog.add_package(package);
    catalog
}

/// Blueprint: f1 and f2 feed an adder, whose sum lands in f3.
fn addition_blueprint() -> CompositeNodeFactory {
    let mut blueprint = CompositeNodeFactory::new("addition").with_category("math");
    blueprint
        .add_nodefactory("f1", FactoryRef::new("library", "float"))
        .unwrap();
    blueprint
        .add_nodefactory("f2", FactoryRef::new("library", "float"))
        .unwrap();
    blueprint
        .add_nodefactory("add1", FactoryRef::new("library", "add"))
        .unwrap();
    blueprint
        .add_nodefactory("f3", FactoryRef::new("library", "float"))
        .unwrap();
    blueprint
        .add_connection(Endpoint::node("f1"), 0, Endpoint::node("add1"), 0)
        .unwrap();
    blueprint
        .add_connection(Endpoint::node("f2"), 0, Endpoint::node("add1"), 1)
        .unwrap();
    blueprint
        .add_connection(Endpoint::node("add1"), 0, Endpoint::node("f3"), 0)
        .unwrap();
    blueprint
}

fn set_member_input(graph: &mut CompositeNode, id: &str, port: usize, value: impl Into<PortValue>) {
    graph
        .get_node_by_id_mut(id)
        .unwrap()
        .as_node_mut()
        .set_input(port, value)
        .unwrap();
}

fn member_output(graph: &CompositeNode, id: &str, port: usize) -> PortValue {
    graph
        .get_node_by_id(id)
        .unwrap()
        .as_node()
        .get_output(port)
        .unwrap()
        .clone()
}

#[test]
fn test_addition_blueprint_evaluates() {
    let _ = env_logger::builder().is_test(true).try_init();
    let table = symbols();
    let catalog = base_catalog();
    let ctx = InstantiationContext {
        catalog: &catalog,
        resolver: &table,
    };

    let mut graph = addition_blueprint().instantiate(&ctx).unwrap();
    assert_eq!(graph.node_count(), 4);
    assert_eq!(graph.connection_count(), 3);

    set_member_input(&mut graph, "f1", 0, 2.0);
    set_member_input(&mut graph, "f2", 0, 3.0);
    graph.call().unwrap();

    assert_eq!(member_output(&graph, "f3", 0), PortValue::from(5.0));
}

#[test]
fn test_composite_with_boundary_ports_as_member() {
    let table = symbols();
    let mut catalog = base_catalog();

    // adder subgraph exposed through two boundary inputs and one output
    let mut additionsg = CompositeNodeFactory::new("additionsg").with_category("math");
    additionsg.set_nb_input(2);
    additionsg.set_nb_output(1);
    additionsg
        .add_nodefactory("add1", FactoryRef::new("library", "add"))
        .unwrap();
    additionsg
        .add_connection(Endpoint::BoundaryIn, 0, Endpoint::node("add1"), 0)
        .unwrap();
    additionsg
        .add_connection(Endpoint::BoundaryIn, 1, Endpoint::node("add1"), 1)
        .unwrap();
    additionsg
        .add_connection(Endpoint::node("add1"), 0, Endpoint::BoundaryOut, 0)
        .unwrap();

    let mut package = Package::new("compositenode");
    package.add_factory(additionsg);
    catalog.add_package(package);

    let mut outer = CompositeNodeFactory::new("outer");
    outer
        .add_nodefactory("f1", FactoryRef::new("library", "float"))
        .unwrap();
    outer
        .add_nodefactory("f2", FactoryRef::new("library", "float"))
        .unwrap();
    outer
        .add_nodefactory("g1", FactoryRef::new("compositenode", "additionsg"))
        .unwrap();
    outer
        .add_nodefactory("f3", FactoryRef::new("library", "float"))
        .unwrap();
    outer
        .add_connection(Endpoint::node("f1"), 0, Endpoint::node("g1"), 0)
        .unwrap();
    outer
        .add_connection(Endpoint::node("f2"), 0, Endpoint::node("g1"), 1)
        .unwrap();
    outer
        .add_connection(Endpoint::node("g1"), 0, Endpoint::node("f3"), 0)
        .unwrap();

    let ctx = InstantiationContext {
        catalog: &catalog,
        resolver: &table,
    };
    let mut graph = outer.instantiate(&ctx).unwrap();
    assert!(
        graph
            .get_node_by_id("g1")
            .unwrap()
            .as_composite()
            .is_some()
    );

    set_member_input(&mut graph, "f1", 0, 2.0);
    set_member_input(&mut graph, "f2", 0, 3.0);
    graph.call().unwrap();

    assert_eq!(member_output(&graph, "f3", 0), PortValue::from(5.0));
}

#[test]
fn test_recursive_blueprints_fail_to_instantiate() {
    let table = symbols();
    let mut catalog = base_catalog();

    let mut graph1 = CompositeNodeFactory::new("graph1");
    graph1
        .add_nodefactory("g2", FactoryRef::new("compositenode", "graph2"))
        .unwrap();
    let mut graph2 = CompositeNodeFactory::new("graph2");
    graph2
        .add_nodefactory("g1", FactoryRef::new("compositenode", "graph1"))
        .unwrap();

    let mut package = Package::new("compositenode");
    package.add_factory(graph1);
    package.add_factory(graph2);
    catalog.add_package(package);

    let ctx = InstantiationContext {
        catalog: &catalog,
        resolver: &table,
    };
    let factory = catalog.lookup("compositenode", "graph1").unwrap();
    let err = factory.instantiate(&ctx).unwrap_err();
    assert!(matches!(err, DataflowError::Recursion(_)));

    // the catalog itself stays intact
    let names = catalog.package("compositenode").unwrap().get_names();
    assert_eq!(names, vec!["graph1", "graph2"]);
}

#[test]
fn test_to_factory_roundtrip_preserves_behavior() {
    let table = symbols();
    let catalog = base_catalog();
    let ctx = InstantiationContext {
        catalog: &catalog,
        resolver: &table,
    };

    let graph = addition_blueprint().instantiate(&ctx).unwrap();

    let mut target = CompositeNodeFactory::new("addition_copy");
    graph.to_factory(&mut target).unwrap();
    assert_eq!(target.members().len(), 4);
    assert_eq!(target.connections().len(), 3);

    let mut copy = target.instantiate(&ctx).unwrap();
    set_member_input(&mut copy, "f1", 0, 2.0);
    set_member_input(&mut copy, "f2", 0, 3.0);
    copy.call().unwrap();
    assert_eq!(member_output(&copy, "f3", 0), PortValue::from(5.0));
}

#[test]
fn test_to_factory_uses_generated_ids() {
    let table = symbols();
    let catalog = base_catalog();
    let ctx = InstantiationContext {
        catalog: &catalog,
        resolver: &table,
    };

    let float = match catalog.lookup("library", "float").unwrap() {
        AnyFactory::Node(f) => f,
        AnyFactory::Composite(_) => panic!("expected a node factory"),
    };

    let mut graph = CompositeNode::new(0, 0);
    let first = graph.add_node(float.instantiate(&ctx).unwrap());
    let second = graph.add_node(float.instantiate(&ctx).unwrap());
    assert_eq!(first, "node0");
    assert_eq!(second, "node1");
    graph
        .connect(Endpoint::node(first), 0, Endpoint::node(second), 0)
        .unwrap();

    let mut target = CompositeNodeFactory::new("copy");
    graph.to_factory(&mut target).unwrap();
    let ids: Vec<&str> = target.members().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["node0", "node1"]);
    assert_eq!(target.connections().len(), 1);
}

#[test]
fn test_to_factory_fails_without_factory_reference() {
    let mut graph = CompositeNode::new(0, 0);
    graph.add_node(flowgraph::Node::new());

    let mut target = CompositeNodeFactory::new("copy");
    let err = graph.to_factory(&mut target).unwrap_err();
    assert!(matches!(err, DataflowError::Instantiation(_)));
}

#[test]
fn test_selective_evaluation_of_separate_outputs() {
    let table = symbols();
    let catalog = base_catalog();
    let ctx = InstantiationContext {
        catalog: &catalog,
        resolver: &table,
    };

    let mut blueprint = CompositeNodeFactory::new("strings_graph");
    blueprint
        .add_nodefactory("src", FactoryRef::new("library", "strings"))
        .unwrap();
    blueprint
        .add_nodefactory("t1", FactoryRef::new("library", "passthrough"))
        .unwrap();
    blueprint
        .add_nodefactory("t2", FactoryRef::new("library", "passthrough"))
        .unwrap();
    blueprint
        .add_connection(Endpoint::node("src"), 0, Endpoint::node("t1"), 0)
        .unwrap();
    blueprint
        .add_connection(Endpoint::node("src"), 1, Endpoint::node("t2"), 0)
        .unwrap();

    let mut graph = blueprint.instantiate(&ctx).unwrap();

    graph
        .eval_as_expression(Some(&Endpoint::node("t1")))
        .unwrap();
    assert_eq!(member_output(&graph, "t1", 0), PortValue::from("teststring"));
    // the sibling branch was not demanded
    assert!(member_output(&graph, "t2", 0).is_null());

    graph
        .eval_as_expression(Some(&Endpoint::node("t2")))
        .unwrap();
    assert_eq!(
        member_output(&graph, "t2", 0),
        PortValue::from("teststring2")
    );
}

#[test]
fn test_selective_update_leaves_sibling_consumer_stale() {
    let table = symbols();
    let catalog = base_catalog();
    let ctx = InstantiationContext {
        catalog: &catalog,
        resolver: &table,
    };

    // one source port fanned out to two consumers
    let mut blueprint = CompositeNodeFactory::new("fanout");
    blueprint
        .add_nodefactory("src", FactoryRef::new("library", "passthrough"))
        .unwrap();
    blueprint
        .add_nodefactory("t1", FactoryRef::new("library", "passthrough"))
        .unwrap();
    blueprint
        .add_nodefactory("t2", FactoryRef::new("library", "passthrough"))
        .unwrap();
    blueprint
        .add_connection(Endpoint::node("src"), 0, Endpoint::node("t1"), 0)
        .unwrap();
    blueprint
        .add_connection(Endpoint::node("src"), 0, Endpoint::node("t2"), 0)
        .unwrap();

    let mut graph = blueprint.instantiate(&ctx).unwrap();
    set_member_input(&mut graph, "src", 0, "teststring");
    graph.call().unwrap();
    assert_eq!(member_output(&graph, "t1", 0), PortValue::from("teststring"));
    assert_eq!(member_output(&graph, "t2", 0), PortValue::from("teststring"));

    set_member_input(&mut graph, "src", 0, "teststring2");
    graph
        .eval_as_expression(Some(&Endpoint::node("t1")))
        .unwrap();
    assert_eq!(
        member_output(&graph, "t1", 0),
        PortValue::from("teststring2")
    );
    // the sibling keeps the previous value until it is demanded itself
    assert_eq!(member_output(&graph, "t2", 0), PortValue::from("teststring"));

    graph
        .eval_as_expression(Some(&Endpoint::node("t2")))
        .unwrap();
    assert_eq!(
        member_output(&graph, "t2", 0),
        PortValue::from("teststring2")
    );
}

#[test]
fn test_instantiate_applies_defaults_and_caption() {
    let table = symbols();
    let catalog = base_catalog();
    let ctx = InstantiationContext {
        catalog: &catalog,
        resolver: &table,
    };

    let factory = catalog.lookup("library", "float").unwrap();
    let node = factory.instantiate(&ctx).unwrap();
    let node = node.as_node();

    assert_eq!(node.caption(), "float");
    assert_eq!(node.get_input("value").unwrap(), &PortValue::from(0.0));
    assert_eq!(
        node.factory(),
        Some(&FactoryRef::new("library", "float"))
    );
}

#[test]
fn test_factory_without_outputs_gets_default_port() {
    let table = symbols();
    let catalog = base_catalog();
    let ctx = InstantiationContext {
        catalog: &catalog,
        resolver: &table,
    };

    let factory = NodeFactory::new("bare", "library.builtins", "identity");
    let node = factory.instantiate(&ctx).unwrap();
    assert_eq!(node.nb_output(), 1);
    assert_eq!(node.outputs().get(0).unwrap().name, "out");
}

#[test]
fn test_missing_symbol_fails_instantiation() {
    let table = symbols();
    let catalog = base_catalog();
    let ctx = InstantiationContext {
        catalog: &catalog,
        resolver: &table,
    };

    let factory = NodeFactory::new("ghost", "library.builtins", "no_such_symbol");
    assert!(matches!(
        factory.instantiate(&ctx),
        Err(DataflowError::Instantiation(_))
    ));
}

#[test]
fn test_missing_member_factory_fails_instantiation() {
    let table = symbols();
    let catalog = base_catalog();
    let ctx = InstantiationContext {
        catalog: &catalog,
        resolver: &table,
    };

    let mut blueprint = CompositeNodeFactory::new("broken");
    blueprint
        .add_nodefactory("n1", FactoryRef::new("library", "does_not_exist"))
        .unwrap();
    assert!(matches!(
        blueprint.instantiate(&ctx),
        Err(DataflowError::Lookup { .. })
    ));
}

#[test]
fn test_any_factory_tagged_json_roundtrip() {
    let node: AnyFactory = float_factory().into();
    let composite: AnyFactory = addition_blueprint().into();

    for factory in [node, composite] {
        let json = serde_json::to_string(&factory).unwrap();
        let loaded: AnyFactory = serde_json::from_str(&json).unwrap();
        assert_eq!(
            serde_json::to_value(&loaded).unwrap(),
            serde_json::to_value(&factory).unwrap()
        );
    }
}
