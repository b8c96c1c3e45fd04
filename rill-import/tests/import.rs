//! End-to-end importer tests: whole graphs in, whole modules out.

use rill_graph::{
    remove_backedges, reverse_post_order, ArgDef, AttrValue, DebugInfo, ElementType,
    FuncAttr, FunctionDef, FunctionLibrary, Graph, Node, OpKind, ShapeHandle, TensorData,
    TensorValue,
};
use rill_import::{import_graph, ImportConfig, OpShapeRegistry};
use rill_ir::{Attribute, Module, Opcode, Operation, Type, Value, RRC};

fn import(graph: &Graph, library: &FunctionLibrary, config: &ImportConfig) -> Module {
    let registry = OpShapeRegistry::with_builtins();
    import_graph(graph, library, &DebugInfo::new(), config, &registry)
        .expect("import should succeed")
}

/// The operations inside the main function's graph region.
fn graph_ops(module: &Module, func: &str) -> Vec<RRC<Operation>> {
    let func = module.find(func).expect("function exists");
    let graph_op = &func.body.ops()[0];
    assert_eq!(graph_op.borrow().opcode, Opcode::Graph);
    graph_op.borrow().region.ops().to_vec()
}

#[test]
fn scenario_constant_into_identity() {
    let mut g = Graph::new();
    let c = g
        .add_node(
            Node::op("c", "Const")
                .with_output(ElementType::I64)
                .with_attr(
                    "value",
                    AttrValue::Tensor(TensorValue::scalar_i64(7)),
                ),
        )
        .unwrap();
    let i = g
        .add_node(Node::op("i", "Identity").with_output(ElementType::I64))
        .unwrap();
    g.add_edge(c, 0, i, 0);
    g.fixup_source_and_sink();

    let config = ImportConfig::default().output("i");
    let module = import(&g, &FunctionLibrary::new(), &config);

    let main = module.find("main").unwrap();
    assert!(main.signature.inputs.is_empty());
    assert_eq!(main.signature.results.len(), 1);

    let ops = graph_ops(&module, "main");
    // Two wrapped operations in dependency order, then the terminator.
    assert_eq!(ops.len(), 3);
    assert_eq!(ops[0].borrow().opcode, Opcode::Island);
    assert_eq!(ops[1].borrow().opcode, Opcode::Island);
    assert_eq!(ops[2].borrow().opcode, Opcode::Fetch);
    assert_eq!(
        ops[0].borrow().region.ops()[0].borrow().name.as_str(),
        "rill.Const"
    );
    assert_eq!(
        ops[1].borrow().region.ops()[0].borrow().name.as_str(),
        "rill.Identity"
    );
    // The fetch returns the identity's value.
    let fetch = ops[2].borrow();
    assert_eq!(fetch.operands.len(), 1);
    let def = fetch.operands[0].defining_op().unwrap();
    assert!(std::rc::Rc::ptr_eq(&def, &ops[1]));
}

#[test]
fn scenario_declared_input_shapes_flow_through() {
    let mut g = Graph::new();
    let x = g
        .add_node(Node::op("x", "Placeholder").with_output(ElementType::F32))
        .unwrap();
    let y = g
        .add_node(Node::op("y", "Identity").with_output(ElementType::F32))
        .unwrap();
    g.add_edge(x, 0, y, 0);
    g.fixup_source_and_sink();

    let config = ImportConfig::default()
        .input("x", ElementType::F32, ShapeHandle::ranked([-1, 4]))
        .output("y");
    let module = import(&g, &FunctionLibrary::new(), &config);

    let main = module.find("main").unwrap();
    assert_eq!(main.signature.inputs.len(), 1);
    let Type::Tensor(input) = &main.signature.inputs[0] else {
        panic!("tensor input expected");
    };
    assert_eq!(input.element, ElementType::F32);
    assert_eq!(input.shape, ShapeHandle::ranked([-1, 4]));

    // Identity propagates the declared shape to the result exactly.
    let Type::Tensor(result) = &main.signature.results[0] else {
        panic!("tensor result expected");
    };
    assert_eq!(result.element, ElementType::F32);
    assert_eq!(result.shape, ShapeHandle::ranked([-1, 4]));

    // The entry-point attribute records the declared names.
    let entry = main.attributes.get("rill.entry_function").unwrap();
    let Attribute::Dict(entries) = entry else {
        panic!("dictionary attribute expected");
    };
    assert!(entries
        .iter()
        .any(|e| e.name == "inputs" && e.value.as_str() == Some("x")));
    assert!(entries
        .iter()
        .any(|e| e.name == "outputs" && e.value.as_str() == Some("y")));
}

fn identity_function(name: &str) -> FunctionDef {
    let mut body = Graph::new();
    let a = body
        .add_node(
            Node::new("x", OpKind::Arg)
                .with_output(ElementType::F32)
                .with_attr("index", AttrValue::Int(0)),
        )
        .unwrap();
    let r = body
        .add_node(Node::new("y", OpKind::Ret).with_attr("index", AttrValue::Int(0)))
        .unwrap();
    body.add_edge(a, 0, r, 0);
    body.fixup_source_and_sink();

    let mut def = FunctionDef::new(name, body);
    def.input_args = vec![ArgDef::new("x", ElementType::F32)];
    def.output_args = vec![ArgDef::new("y", ElementType::F32)];
    def
}

#[test]
fn scenario_library_functions_convert_once() {
    let mut library = FunctionLibrary::new();
    library.insert(identity_function("double"));

    let mut g = Graph::new();
    let c = g
        .add_node(
            Node::op("c", "Const")
                .with_output(ElementType::F32)
                .with_attr("value", AttrValue::Tensor(TensorValue::scalar_f32(1.0))),
        )
        .unwrap();
    let a = g
        .add_node(Node::op("a", "double").with_output(ElementType::F32))
        .unwrap();
    let b = g
        .add_node(Node::op("b", "double").with_output(ElementType::F32))
        .unwrap();
    g.add_edge(c, 0, a, 0);
    g.add_edge(a, 0, b, 0);
    g.fixup_source_and_sink();

    let config = ImportConfig::default().output("b");
    let module = import(&g, &library, &config);

    // main plus exactly one converted copy of the callee.
    assert_eq!(module.len(), 2);
    let callee = module
        .functions()
        .iter()
        .find(|f| f.name != "main")
        .unwrap();
    assert!(callee.name.as_str().starts_with("double"));
    assert_ne!(callee.name.as_str(), "double");
    assert_eq!(callee.signature.inputs.len(), 1);
    assert_eq!(callee.signature.results.len(), 1);

    // Call sites use the translated name.
    let ops = graph_ops(&module, "main");
    let call_names: Vec<String> = ops
        .iter()
        .filter(|op| op.borrow().opcode == Opcode::Island)
        .map(|op| op.borrow().region.ops()[0].borrow().name.to_string())
        .collect();
    assert!(call_names
        .iter()
        .filter(|n| **n == format!("rill.{}", callee.name))
        .count()
        >= 2);
}

#[test]
fn scenario_pruning_drops_disconnected_nodes() {
    let mut g = Graph::new();
    let c = g
        .add_node(
            Node::op("c", "Const")
                .with_output(ElementType::I64)
                .with_attr("value", AttrValue::Tensor(TensorValue::scalar_i64(1))),
        )
        .unwrap();
    let i = g
        .add_node(Node::op("i", "Identity").with_output(ElementType::I64))
        .unwrap();
    g.add_node(
        Node::op("orphan", "Const")
            .with_output(ElementType::I64)
            .with_attr("value", AttrValue::Tensor(TensorValue::scalar_i64(2))),
    )
    .unwrap();
    g.add_edge(c, 0, i, 0);
    g.fixup_source_and_sink();

    let config = ImportConfig {
        prune_unused_nodes: true,
        ..ImportConfig::default()
    }
    .output("i");
    let module = import(&g, &FunctionLibrary::new(), &config);

    let ops = graph_ops(&module, "main");
    let names: Vec<String> = ops
        .iter()
        .filter(|op| op.borrow().opcode == Opcode::Island)
        .filter_map(|op| {
            op.borrow().region.ops()[0]
                .borrow()
                .attributes
                .get("name")
                .and_then(|a| a.as_str().map(String::from))
        })
        .collect();
    assert!(names.contains(&"c".to_string()));
    assert!(names.contains(&"i".to_string()));
    assert!(!names.contains(&"orphan".to_string()));
}

#[test]
fn scenario_function_attribute_expands_to_reference_plus_nested() {
    let mut library = FunctionLibrary::new();
    library.insert(identity_function("foo"));

    let mut func_attr = FuncAttr::new("foo");
    func_attr.attrs.insert("k".to_string(), AttrValue::Int(1));

    let mut g = Graph::new();
    let c = g
        .add_node(
            Node::op("c", "Const")
                .with_output(ElementType::F32)
                .with_attr("value", AttrValue::Tensor(TensorValue::scalar_f32(0.0))),
        )
        .unwrap();
    let n = g
        .add_node(
            Node::op("n", "Apply")
                .with_output(ElementType::F32)
                .with_attr("body", AttrValue::Func(func_attr)),
        )
        .unwrap();
    g.add_edge(c, 0, n, 0);
    g.fixup_source_and_sink();

    let config = ImportConfig::default().output("n");
    let module = import(&g, &library, &config);

    let ops = graph_ops(&module, "main");
    let apply = ops
        .iter()
        .filter(|op| op.borrow().opcode == Opcode::Island)
        .map(|op| op.borrow().region.ops()[0].clone())
        .find(|inner| {
            inner.borrow().attributes.get("name").and_then(|a| a.as_str().map(String::from))
                == Some("n".to_string())
        })
        .unwrap();

    let apply = apply.borrow();
    let reference = apply.attributes.get("body").unwrap();
    let Attribute::SymbolRef(target) = reference else {
        panic!("symbol reference expected");
    };
    assert!(module.find(*target).is_some());
    assert_eq!(apply.attributes.get("body.k"), Some(&Attribute::Int(1)));
}

#[test]
fn feedback_edge_restores_at_original_position() {
    let mut g = Graph::new();
    let c = g
        .add_node(
            Node::op("c", "Const")
                .with_output(ElementType::I32)
                .with_attr(
                    "value",
                    AttrValue::Tensor(
                        TensorValue::new([], TensorData::I32(vec![0])).unwrap(),
                    ),
                ),
        )
        .unwrap();
    let enter = g
        .add_node(Node::new("enter", OpKind::Enter).with_output(ElementType::I32))
        .unwrap();
    let merge = g
        .add_node(
            Node::new("merge", OpKind::Merge)
                .with_output(ElementType::I32)
                .with_output(ElementType::I32),
        )
        .unwrap();
    let next = g
        .add_node(Node::new("next", OpKind::Feedback).with_output(ElementType::I32))
        .unwrap();
    g.add_edge(c, 0, enter, 0);
    g.add_edge(enter, 0, merge, 0);
    g.add_edge(merge, 0, next, 0);
    g.add_edge(next, 0, merge, 1);
    g.fixup_source_and_sink();

    let config = ImportConfig::default().output("merge");
    let module = import(&g, &FunctionLibrary::new(), &config);
    let ops = graph_ops(&module, "main");

    // The feedback source sits at the top of the region.
    assert_eq!(ops[0].borrow().opcode, Opcode::FeedbackSource);

    let merge_op = ops
        .iter()
        .find(|op| op.borrow().opcode == Opcode::Merge)
        .unwrap();
    let merge_op = merge_op.borrow();
    // Rebuilt with the feedback value at its original input position,
    // everything else in the original order.
    assert_eq!(merge_op.operands.len(), 2);
    let first = merge_op.operands[0].defining_op().unwrap();
    assert_eq!(first.borrow().opcode, Opcode::Island);
    let Value::Result { op: src, index } = &merge_op.operands[1] else {
        panic!("operand should be an operation result");
    };
    assert_eq!(src.borrow().opcode, Opcode::FeedbackSource);
    assert_eq!(*index, 0);

    // The sink consumes the source's token.
    let sink = ops
        .iter()
        .find(|op| op.borrow().opcode == Opcode::FeedbackSink)
        .unwrap();
    let token = sink.borrow().operands[0].clone();
    let Value::Result { op: token_src, index } = token else {
        panic!("token operand expected");
    };
    assert!(std::rc::Rc::ptr_eq(&token_src, &ops[0]));
    assert_eq!(index, 1);
}

#[test]
fn acyclic_graphs_round_trip_backedge_elimination() {
    let mut g = Graph::new();
    let a = g
        .add_node(Node::op("a", "Const").with_output(ElementType::I32))
        .unwrap();
    let b = g
        .add_node(Node::op("b", "Neg").with_output(ElementType::I32))
        .unwrap();
    g.add_edge(a, 0, b, 0);
    g.fixup_source_and_sink();

    let order_before = reverse_post_order(&g);
    let mut clone = g.clone();
    let removed = remove_backedges(&mut clone);
    assert!(removed.is_empty());
    assert_eq!(reverse_post_order(&clone), order_before);
}

#[test]
fn multi_output_declared_input_fails_deterministically() {
    let build = || {
        let mut g = Graph::new();
        let s = g
            .add_node(
                Node::op("s", "Split")
                    .with_output(ElementType::F32)
                    .with_output(ElementType::F32),
            )
            .unwrap();
        let i = g
            .add_node(Node::op("i", "Identity").with_output(ElementType::F32))
            .unwrap();
        g.add_edge(s, 0, i, 0);
        g.fixup_source_and_sink();
        g
    };
    let config = ImportConfig::default()
        .input("s", ElementType::F32, ShapeHandle::Unranked)
        .output("i");
    let registry = OpShapeRegistry::with_builtins();

    let first = import_graph(
        &build(),
        &FunctionLibrary::new(),
        &DebugInfo::new(),
        &config,
        &registry,
    )
    .unwrap_err();
    let second = import_graph(
        &build(),
        &FunctionLibrary::new(),
        &DebugInfo::new(),
        &config,
        &registry,
    )
    .unwrap_err();
    assert!(first.is_failed_precondition());
    assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn missing_output_name_is_rejected() {
    let mut g = Graph::new();
    g.add_node(Node::op("a", "Const").with_output(ElementType::I32))
        .unwrap();
    g.fixup_source_and_sink();

    let config = ImportConfig::default().output("nonexistent");
    let registry = OpShapeRegistry::with_builtins();
    let err = import_graph(
        &g,
        &FunctionLibrary::new(),
        &DebugInfo::new(),
        &config,
        &registry,
    )
    .unwrap_err();
    assert!(err.is_invalid_argument());
}

#[test]
fn tensor_data_matches_declared_element_type() {
    // Guards the test fixtures above: scalar constants carry one value.
    let t = TensorValue::new([], TensorData::I64(vec![3])).unwrap();
    assert_eq!(t.data.len(), 1);
}
