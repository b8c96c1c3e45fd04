//! The importer pipeline: prepare (cut cycles, order, refine shapes),
//! convert node by node, then patch the cycles back in and wire up the
//! function signature.

use crate::config::{parse_output, ArrayInfo, ImportConfig};
use crate::refiner::ShapeRefiner;
use crate::registry::OpShapeRegistry;
use ahash::AHashMap;
use itertools::Itertools;
use rill_graph::{
    prune_reverse_reachable, remove_backedges, reverse_post_order, AttrValue, DebugInfo,
    FuncAttr, FunctionLibrary, Graph, Node, NodeId, OpKind, Port, RemovedEdge, TensorType,
};
use rill_ir::{
    control_result, mangle_attr_name, mangle_shape, mangle_type, result, Attribute,
    Attributes, Func, FunctionType, Location, Module, NamedAttribute, Opcode, Operation,
    OperationState, Region, Type, Value, RRC,
};
use rill_utils::{Error, Id, NameGenerator, RillResult};
use smallvec::smallvec;
use std::collections::HashSet;

/// Namespace prefix put on every produced operation name.
const OP_PREFIX: &str = "rill.";

/// Translate a graph (with its function library, optional debug side
/// table, and configuration) into an IR module. The main graph becomes
/// a function named `main`; every transitively referenced library
/// function is converted exactly once.
pub fn import_graph(
    graph: &Graph,
    library: &FunctionLibrary,
    debug_info: &DebugInfo,
    config: &ImportConfig,
    registry: &OpShapeRegistry,
) -> RillResult<Module> {
    let mut taken: HashSet<Id> = library.names().collect();
    taken.insert(Id::new("main"));
    let mut state = ModuleState {
        module: Module::new(),
        library,
        debug_info,
        registry,
        name_map: AHashMap::new(),
        namegen: NameGenerator::with_prev_defined_names(taken),
    };

    let mut work = graph.clone();
    if config.convert_legacy_inputs {
        rewrite_legacy_inputs(&mut work, config)?;
    }

    let mut importer = Importer::new(&mut state, config.clone());
    if config.graph_as_function {
        if config.prune_unused_nodes
            || !config.inputs.is_empty()
            || !config.outputs.is_empty()
        {
            return Err(Error::invalid_argument(
                "pruning and declared inputs/outputs are unsupported when the \
                 graph is converted as a function",
            ));
        }
        importer.prepare(&work)?;
        let arg_ids = collect_indexed(importer.working_graph(), &OpKind::Arg)?;
        let ret_ids = collect_indexed(importer.working_graph(), &OpKind::Ret)?;
        let func_type = importer.infer_function_type(&arg_ids, &ret_ids)?;

        let mut attrs = Attributes::new();
        if !arg_ids.is_empty() || !ret_ids.is_empty() {
            let join = |ids: &[NodeId]| {
                ids.iter()
                    .map(|&id| importer.working_graph().node(id).name)
                    .join(",")
            };
            attrs.push(
                "rill.entry_function",
                Attribute::Dict(vec![
                    NamedAttribute::new("inputs", Attribute::Str(join(&arg_ids))),
                    NamedAttribute::new("outputs", Attribute::Str(join(&ret_ids))),
                ]),
            );
        }

        let arg_nodes: Vec<_> = arg_ids.iter().map(|&id| (id, 0)).collect();
        let ret_nodes: Vec<_> = ret_ids.iter().map(|&id| (id, 0)).collect();
        importer.convert(Id::new("main"), func_type, &arg_nodes, &ret_nodes, &[], attrs)?;
    } else {
        importer.prepare(&work)?;
        let (func_type, arg_nodes, ret_nodes) = importer.infer_main_function_type()?;

        let mut attrs = Attributes::new();
        if !config.inputs.is_empty() || !config.outputs.is_empty() {
            let inputs = config.inputs.keys().join(",");
            let outputs = config.outputs.iter().join(",");
            attrs.push(
                "rill.entry_function",
                Attribute::Dict(vec![
                    NamedAttribute::new("inputs", Attribute::Str(inputs)),
                    NamedAttribute::new("outputs", Attribute::Str(outputs)),
                ]),
            );
        }

        importer.convert(Id::new("main"), func_type, &arg_nodes, &ret_nodes, &[], attrs)?;
    }

    state.module.versions = work.versions.clone();
    Ok(state.module)
}

/// State shared by the whole recursive conversion: the module being
/// built, the function-name translation table, and the collaborators.
struct ModuleState<'a> {
    module: Module,
    library: &'a FunctionLibrary,
    debug_info: &'a DebugInfo,
    registry: &'a OpShapeRegistry,
    /// Source function name to chosen IR function name. Consulted
    /// before every recursive descent so a function converts once.
    name_map: AHashMap<Id, Id>,
    namegen: NameGenerator,
}

/// Converts one graph (the main graph or one function body) into one IR
/// function.
struct Importer<'s, 'a> {
    state: &'s mut ModuleState<'a>,
    config: ImportConfig,
    /// Working clone of the input graph; the caller's graph is never
    /// touched.
    graph: Graph,
    ordered: Vec<NodeId>,
    refiner: ShapeRefiner<'a>,
    /// Source node of each removed back-edge to its source output.
    backedge_src_output: AHashMap<NodeId, Port>,
    /// Destination node of each removed back-edge to the edge record.
    backedge_dst_input: AHashMap<NodeId, RemovedEdge>,
    /// Converted node to its IR operation (the island, the bare
    /// structural op, or the sink half of a feedback pair).
    node_values: AHashMap<NodeId, RRC<Operation>>,
    /// The graph region under construction.
    region: Region,
}

impl<'s, 'a> Importer<'s, 'a> {
    fn new(state: &'s mut ModuleState<'a>, config: ImportConfig) -> Self {
        let registry = state.registry;
        Importer {
            state,
            config,
            graph: Graph::new(),
            ordered: Vec::new(),
            refiner: ShapeRefiner::new(registry),
            backedge_src_output: AHashMap::new(),
            backedge_dst_input: AHashMap::new(),
            node_values: AHashMap::new(),
            region: Region::new(),
        }
    }

    fn working_graph(&self) -> &Graph {
        &self.graph
    }

    /// Clone the input graph, cut its cycles, order its nodes, and
    /// refine shapes to a fixpoint.
    fn prepare(&mut self, input: &Graph) -> RillResult<()> {
        self.graph = input.clone();
        self.graph.fixup_source_and_sink();

        let removed = remove_backedges(&mut self.graph);
        log::debug!("found {} backedges", removed.len());
        for edge in removed {
            if let Some(prev) = self.backedge_src_output.get(&edge.src) {
                if *prev != edge.src_output {
                    return Err(Error::failed_precondition(format!(
                        "more than one output of node `{}' is a backedge",
                        self.graph.node(edge.src).name
                    )));
                }
            }
            self.backedge_src_output.insert(edge.src, edge.src_output);
            // A merge receives a single backedge; several feedback nodes
            // into one merge is unexpected here.
            debug_assert!(!self.backedge_dst_input.contains_key(&edge.dst));
            self.backedge_dst_input.insert(edge.dst, edge);
        }

        self.ordered = reverse_post_order(&self.graph);
        self.refine_shapes()
    }

    /// Seed declared inputs, initialize per-node inference state, prune
    /// if requested, and iterate inference to a fixpoint.
    fn refine_shapes(&mut self) -> RillResult<()> {
        // Declared inputs force their node's output type. Pass-through
        // placeholder kinds take the type as attributes; anything else
        // is spliced out and replaced by a synthetic placeholder.
        for id in self.ordered.clone() {
            let node = self.graph.node(id);
            let Some(info) = self.config.inputs.get(node.name.as_str()) else {
                continue;
            };
            let info = info.clone();
            let pass_through = matches!(node.kind, OpKind::Arg)
                || matches!(&node.kind, OpKind::Operator(op)
                    if *op == "Placeholder" || *op == "LegacyInput");
            if pass_through {
                let node = self.graph.node_mut(id);
                node.attrs
                    .insert("shape".into(), AttrValue::Shape(info.shape.clone()));
                node.attrs
                    .insert("dtype".into(), AttrValue::Type(info.element));
            } else {
                if self.graph.node(id).num_outputs() > 1 {
                    return Err(Error::failed_precondition(format!(
                        "declared input `{}' must be an operation with a single output",
                        self.graph.node(id).name
                    )));
                }
                self.replace_with_placeholder(id, &info)?;
            }
        }

        // Substitutions may have detached nodes; reattach the virtual
        // source and sink before anything orders the graph again.
        self.graph.fixup_source_and_sink();

        if self.config.prune_unused_nodes {
            let mut keep = HashSet::new();
            for name in self.config.inputs.keys() {
                keep.insert(self.lookup_node(name)?);
            }
            for spec in &self.config.outputs {
                let (name, _) = parse_output(spec)?;
                keep.insert(self.lookup_node(name)?);
            }
            if keep.is_empty() {
                log::debug!("no declared outputs; skipping pruning");
            } else if prune_reverse_reachable(&mut self.graph, &keep) {
                log::debug!("pruned nodes unreachable from the declared outputs");
            }
        }

        self.ordered = reverse_post_order(&self.graph);

        // Initialize inference state in dependency order.
        for i in 0..self.ordered.len() {
            let id = self.ordered[i];
            self.refiner.add_node(&self.graph, id);
            let node = self.graph.node(id);
            match &node.kind {
                // A read of mutable state is otherwise unknowable; an
                // out-of-band shape annotation fills it in when present.
                OpKind::Operator(op) if *op == "ReadVariable" => {
                    if let Some(AttrValue::List(list)) = node.attrs.get("_output_shapes") {
                        let patches: Vec<_> = list
                            .shapes
                            .iter()
                            .take(node.num_outputs())
                            .enumerate()
                            .map(|(idx, shape)| {
                                (idx, TensorType::new(node.outputs[idx], shape.clone()))
                            })
                            .collect();
                        for (idx, ty) in patches {
                            self.refiner.set_output(id, idx, ty);
                        }
                    }
                }
                // Formal parameters seed from their declared shape so it
                // propagates into the function body.
                OpKind::Arg => {
                    if let Some(&element) = node.outputs.first() {
                        let ty = match node.attrs.get("shape").and_then(|v| v.as_shape()) {
                            Some(shape) => TensorType::new(element, shape.clone()),
                            None => TensorType::unranked(element),
                        };
                        self.refiner.set_output(id, 0, ty);
                    }
                }
                _ => {}
            }
        }

        // Iterate to a fixpoint, or stop at the cap with conservative
        // shapes.
        log::debug!("inferring graph shapes to fixpoint");
        let cap = self.config.shape_refine_rounds;
        let mut changed = true;
        let mut rounds = 0;
        while changed && rounds != cap {
            changed = false;
            for i in 0..self.ordered.len() {
                let id = self.ordered[i];
                if self.refiner.update_node(&self.graph, id) {
                    changed = true;
                }
            }
            rounds += 1;
        }
        if rounds >= cap {
            log::warn!(
                "graph shapes did not converge to a fixpoint within {} rounds; \
                 shapes may be conservative",
                cap
            );
        }
        Ok(())
    }

    /// Splice a synthetic placeholder carrying the declared type over
    /// the node `id`, rewiring all consumers. The placeholder takes
    /// over the node's name.
    fn replace_with_placeholder(&mut self, id: NodeId, info: &ArrayInfo) -> RillResult<NodeId> {
        let name = self.graph.node(id).name;
        let consumers = self.graph.out_edges(id);
        self.graph.remove_node(id);

        let mut node = Node::op(name, "Placeholder")
            .with_attr("shape", AttrValue::Shape(info.shape.clone()))
            .with_attr("dtype", AttrValue::Type(info.element));
        node.outputs = smallvec![info.element];
        let new_id = self.graph.add_node(node)?;

        for (dst, edge) in consumers {
            if edge.src_output.is_control() {
                self.graph.add_control_edge(new_id, dst);
            } else if let Some(input) = edge.dst_input.index() {
                self.graph.add_edge(new_id, 0, dst, input);
            }
        }
        Ok(new_id)
    }

    fn lookup_node(&self, name: &str) -> RillResult<NodeId> {
        self.graph.find_node(name).ok_or_else(|| {
            Error::failed_precondition(format!("graph does not contain node `{}'", name))
        })
    }

    /// Resolve the declared inputs/outputs to nodes and build the main
    /// function's signature: argument types come from the declarations,
    /// result types from the shape refiner.
    fn infer_main_function_type(
        &self,
    ) -> RillResult<(FunctionType, Vec<(NodeId, usize)>, Vec<(NodeId, usize)>)> {
        let mut arg_nodes = Vec::with_capacity(self.config.inputs.len());
        let mut arg_types = Vec::with_capacity(self.config.inputs.len());
        for (name, info) in &self.config.inputs {
            let id = self.graph.find_node(name.as_str()).ok_or_else(|| {
                Error::invalid_argument(format!("input `{}' was not found in the graph", name))
            })?;
            arg_nodes.push((id, 0));
            arg_types.push(Type::Tensor(TensorType::new(
                info.element,
                info.shape.clone(),
            )));
        }

        let mut ret_nodes = Vec::with_capacity(self.config.outputs.len());
        let mut ret_types = Vec::with_capacity(self.config.outputs.len());
        for spec in &self.config.outputs {
            let (name, port) = parse_output(spec)?;
            let id = self.graph.find_node(name).ok_or_else(|| {
                Error::invalid_argument(format!("output `{}' was not found in the graph", name))
            })?;
            if self.graph.node(id).num_outputs() <= port {
                return Err(Error::invalid_argument(format!(
                    "invalid output index {} specified for node `{}'",
                    port, name
                )));
            }
            ret_nodes.push((id, port));
            ret_types.push(Type::Tensor(self.refiner.output(id, port)?));
        }

        Ok((FunctionType::new(arg_types, ret_types), arg_nodes, ret_nodes))
    }

    /// Function-body signature: argument types are the inferred types of
    /// the `Arg` nodes, result types the inferred types of the values
    /// feeding the `Ret` nodes.
    fn infer_function_type(
        &self,
        arg_ids: &[NodeId],
        ret_ids: &[NodeId],
    ) -> RillResult<FunctionType> {
        let mut arg_types = Vec::with_capacity(arg_ids.len());
        for &id in arg_ids {
            arg_types.push(Type::Tensor(self.refiner.output(id, 0)?));
        }
        let mut ret_types = Vec::with_capacity(ret_ids.len());
        for &id in ret_ids {
            let feed = self
                .graph
                .in_edges(id)
                .into_iter()
                .find(|(_, e)| e.dst_input == Port::Data(0));
            let (src, edge) = feed.ok_or_else(|| {
                Error::malformed_structure(format!(
                    "return node `{}' has no data input",
                    self.graph.node(id).name
                ))
            })?;
            let idx = edge
                .src_output
                .index()
                .ok_or_else(|| Error::internal("data edge with a control source port"))?;
            ret_types.push(Type::Tensor(self.refiner.output(src, idx as usize)?));
        }
        Ok(FunctionType::new(arg_types, ret_types))
    }

    /// Convert the prepared graph into a function and append it to the
    /// module.
    fn convert(
        mut self,
        func_name: Id,
        func_type: FunctionType,
        arg_nodes: &[(NodeId, usize)],
        ret_nodes: &[(NodeId, usize)],
        control_ret_nodes: &[NodeId],
        attrs: Attributes,
    ) -> RillResult<()> {
        for id in self.ordered.clone() {
            self.convert_node(id)?;
        }
        self.add_backedges()?;

        let mut func = Func::new(func_name, func_type.clone());
        func.attributes = attrs;
        self.wire_args_and_rets(&mut func, &func_type, arg_nodes, ret_nodes, control_ret_nodes)?;
        self.state.module.push(func);
        Ok(())
    }

    /// Convert one node into its IR operation(s) and register the
    /// result for later operand resolution.
    fn convert_node(&mut self, id: NodeId) -> RillResult<()> {
        let node = self.graph.node(id).clone();
        if !node.is_op() {
            // The virtual source and sink have no IR counterpart.
            return Ok(());
        }

        // A node whose operation names a library function converts the
        // callee first and uses its translated name.
        let mut effective = node.op_name();
        if let OpKind::Operator(op) = node.kind {
            if self.state.library.find(op).is_some() {
                self.convert_lib_function(op)?;
                effective = self.state.name_map[&op];
            }
        }
        let base_name = format!("{}{}", OP_PREFIX, effective);
        let mut op_name = base_name.clone();
        if self.backedge_src_output.contains_key(&id) {
            // This occurrence produces the loop feedback; mark it as the
            // sink half of the pair.
            op_name.push_str(".sink");
        }

        let location = self.location_for(&node);
        let mut state = OperationState::new(location, Id::new(&op_name), opcode_for(&node.kind));

        // Result types, skipping the removed backedge's source output:
        // its consumer is rewired when the backedge is restored.
        let skipped = self
            .backedge_src_output
            .get(&id)
            .and_then(|p| p.index())
            .map(|i| i as usize);
        for idx in 0..node.num_outputs() {
            if skipped == Some(idx) {
                continue;
            }
            state.add_result_type(Type::Tensor(self.refiner.output(id, idx)?));
        }

        // Operands, deterministically ordered: data edges by input
        // index, then control edges by source name.
        let mut in_edges = self.graph.in_edges(id);
        in_edges.sort_by_key(|(src, e)| (e.dst_input, self.graph.node(*src).name));
        let total = in_edges.len();
        let mut control_operands = Vec::new();
        for (src, edge) in in_edges {
            if src == self.graph.source() {
                if total != 1 {
                    return Err(Error::failed_precondition(format!(
                        "node `{}' has other inputs besides the virtual source",
                        node.name
                    )));
                }
                // The virtual source is never materialized.
                continue;
            }
            if matches!(self.graph.node(src).kind, OpKind::Arg) && edge.is_control() {
                // Formal parameters are available before any node runs,
                // so control edges from them are redundant.
                continue;
            }
            let inst = self.node_values.get(&src).ok_or_else(|| {
                Error::failed_precondition(format!(
                    "graph not traversed in reverse post-order; `{}' used before definition",
                    self.graph.node(src).name
                ))
            })?;
            if edge.is_control() {
                control_operands.push(control_result(inst));
            } else {
                let idx = edge
                    .src_output
                    .index()
                    .ok_or_else(|| Error::internal("data edge with a control source port"))?;
                state.add_operand(result(inst, idx as usize));
            }
        }

        // Attributes: scalar/list/tensor attributes in encountered
        // order; function-valued attributes afterwards in name order,
        // since the attribute map's iteration order is not guaranteed.
        let mut funcs: Vec<(String, FuncAttr)> = Vec::new();
        for (name, value) in &node.attrs {
            if let AttrValue::Func(f) = value {
                funcs.push((name.clone(), f.clone()));
            } else {
                let attr = self.convert_attribute(value)?;
                state.add_attribute(name.as_str(), attr);
            }
        }
        funcs.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, func_attr) in funcs {
            self.convert_function_call_attribute(&name, &func_attr, &mut state)?;
        }

        state.add_attribute("name", Attribute::Str(node.name.to_string()));
        state.add_attribute("device", Attribute::Str(node.device.clone()));

        // The stateless/stateful conditional and loop variants collapse
        // to one operation each, keeping the distinction as data.
        if let OpKind::Operator(op) = node.kind {
            if op == "If" || op == "StatelessIf" {
                state.name = Id::new(format!("{}If", OP_PREFIX));
                state.add_attribute("is_stateless", Attribute::Bool(op == "StatelessIf"));
            } else if op == "While" || op == "StatelessWhile" {
                state.name = Id::new(format!("{}While", OP_PREFIX));
                state.add_attribute("is_stateless", Attribute::Bool(op == "StatelessWhile"));
            }
        }

        let built = self.create_operation(&node, state, control_operands, &base_name)?;
        self.node_values.insert(id, built);
        Ok(())
    }

    /// Materialize the operation for one node: an island around an
    /// ordinary computation, a bare control-structure operation, or a
    /// feedback source/sink pair.
    fn create_operation(
        &mut self,
        node: &Node,
        state: OperationState,
        control_operands: Vec<Value>,
        base_name: &str,
    ) -> RillResult<RRC<Operation>> {
        match node.kind {
            OpKind::Switch
            | OpKind::Merge
            | OpKind::Enter
            | OpKind::Exit
            | OpKind::LoopCond
            | OpKind::ControlTrigger => {
                let mut state = state;
                state.add_result_type(Type::Control);
                state.add_operands(control_operands);
                let op = state.build();
                self.region.push(op.clone());
                Ok(op)
            }
            OpKind::Feedback => {
                // A feedback node becomes two operations linked by a
                // token: the source goes to the top of the region, the
                // only place its sole consumer can see it from.
                let carried = state.operands.first().cloned().ok_or_else(|| {
                    Error::malformed_structure(format!(
                        "loop feedback node `{}' has no data input",
                        node.name
                    ))
                })?;
                let mut src_state = OperationState::new(
                    state.location.clone(),
                    Id::new(format!("{}.source", base_name)),
                    Opcode::FeedbackSource,
                );
                src_state.attributes = state.attributes.clone();
                src_state.add_result_type(carried.ty());
                src_state.add_result_type(Type::Token);
                src_state.add_result_type(Type::Control);
                let source = src_state.build();
                self.region.insert_at_front(source.clone());

                let mut sink_state = OperationState::new(
                    state.location.clone(),
                    state.name,
                    Opcode::FeedbackSink,
                );
                sink_state.attributes = state.attributes;
                sink_state.add_operand(result(&source, 1));
                sink_state.add_operands(state.operands);
                sink_state.add_operands(control_operands);
                sink_state.add_result_type(Type::Control);
                let sink = sink_state.build();
                self.region.push(sink.clone());
                Ok(sink)
            }
            _ => {
                // Ordinary computation: wrap in an island so dataflow
                // operations stay insulated from the control-structure
                // operations around them.
                let loc = state.location.clone();
                let inner = state.build();
                let mut yield_state =
                    OperationState::new(loc.clone(), "rill.yield", Opcode::Yield);
                let num_results = inner.borrow().num_results();
                for i in 0..num_results {
                    yield_state.add_operand(result(&inner, i));
                }
                let terminator = yield_state.build();

                let mut island_state =
                    OperationState::new(loc, "rill.island", Opcode::Island);
                for ty in &inner.borrow().result_types {
                    island_state.add_result_type(ty.clone());
                }
                island_state.add_result_type(Type::Control);
                island_state.add_operands(control_operands);
                let mut body = Region::new();
                body.push(inner);
                body.push(terminator);
                let island = island_state.build_with_region(body);
                self.region.push(island.clone());
                Ok(island)
            }
        }
    }

    /// Map one native attribute value to one IR attribute.
    fn convert_attribute(&mut self, value: &AttrValue) -> RillResult<Attribute> {
        Ok(match value {
            AttrValue::Int(i) => Attribute::Int(*i),
            AttrValue::Str(s) => Attribute::Str(s.clone()),
            AttrValue::Float(f) => Attribute::Float(*f),
            AttrValue::Bool(b) => Attribute::Bool(*b),
            AttrValue::Type(t) => Attribute::Str(mangle_type(*t)),
            AttrValue::Shape(s) => Attribute::Str(mangle_shape(s)),
            AttrValue::Tensor(t) => Attribute::Elements(t.clone()),
            AttrValue::List(list) => {
                let mut items = Vec::new();
                items.extend(list.ints.iter().map(|&i| Attribute::Int(i)));
                items.extend(list.strs.iter().map(|s| Attribute::Str(s.clone())));
                items.extend(list.floats.iter().map(|&f| Attribute::Float(f)));
                items.extend(list.bools.iter().map(|&b| Attribute::Bool(b)));
                items.extend(
                    list.types.iter().map(|&t| Attribute::Str(mangle_type(t))),
                );
                items.extend(
                    list.shapes.iter().map(|s| Attribute::Str(mangle_shape(s))),
                );
                items.extend(list.tensors.iter().map(|t| Attribute::Elements(t.clone())));
                for func in &list.funcs {
                    if !func.attrs.is_empty() {
                        return Err(Error::unimplemented(
                            "function references with attributes inside list attributes",
                        ));
                    }
                    let sym = self.convert_function_call_name(&func.name)?;
                    items.push(Attribute::SymbolRef(sym));
                }
                Attribute::Array(items)
            }
            AttrValue::Func(_) => {
                return Err(Error::internal(
                    "function-valued attributes are expanded separately",
                ))
            }
            AttrValue::Placeholder(_) => {
                return Err(Error::unimplemented("placeholder attribute values"))
            }
            AttrValue::Unset => Attribute::Unit,
        })
    }

    /// Resolve a function name to its IR symbol, converting the
    /// function on first reference.
    fn convert_function_call_name(&mut self, name: &str) -> RillResult<Id> {
        let name = Id::new(name);
        self.convert_lib_function(name)?;
        Ok(self.state.name_map[&name])
    }

    /// Expand a function-valued attribute: one reference attribute for
    /// the base name plus one attribute per nested key.
    fn convert_function_call_attribute(
        &mut self,
        base_name: &str,
        func: &FuncAttr,
        state: &mut OperationState,
    ) -> RillResult<()> {
        let sym = self.convert_function_call_name(&func.name)?;
        state.add_attribute(base_name, Attribute::SymbolRef(sym));
        for (key, value) in &func.attrs {
            let attr = self.convert_attribute(value)?;
            state.add_attribute(Id::new(format!("{}.{}", base_name, key)), attr);
        }
        Ok(())
    }

    /// Convert a library function on first reference. Idempotent: the
    /// name table is populated before descending, so recursive and
    /// repeated references are no-ops.
    fn convert_lib_function(&mut self, func_name: Id) -> RillResult<()> {
        if self.state.name_map.contains_key(&func_name) {
            return Ok(());
        }
        let ir_name = self.state.namegen.gen_name(func_name);
        self.state.name_map.insert(func_name, ir_name);

        let library = self.state.library;
        let fdef = library.find(func_name).ok_or_else(|| {
            Error::failed_precondition(format!(
                "failed to find function `{}' in the library; the input graph is ill-formed",
                func_name
            ))
        })?;

        // Definition-level attributes carry over with namespaced names.
        let mut attrs = Attributes::new();
        for (key, value) in &fdef.attrs {
            let attr = self.convert_attribute(value)?;
            attrs.push(Id::new(mangle_attr_name(key)), attr);
        }
        if fdef.stateful {
            attrs.push("rill.is_stateful", Attribute::Unit);
        }
        if let Some(grad) = library.find_gradient(func_name) {
            self.convert_lib_function(grad)?;
            attrs.push("rill.gradient", Attribute::SymbolRef(self.state.name_map[&grad]));
        }

        // The reserved `_input_shapes` attribute seeds the declared
        // inputs of the sub-import so argument shapes reach the body.
        let mut specs = ImportConfig {
            shape_refine_rounds: self.config.shape_refine_rounds,
            ..ImportConfig::default()
        };
        if let Some(AttrValue::List(list)) = fdef.attrs.get("_input_shapes") {
            debug_assert_eq!(list.shapes.len(), fdef.input_args.len());
            for (arg, shape) in fdef.input_args.iter().zip(&list.shapes) {
                specs
                    .inputs
                    .insert(arg.name.to_string(), ArrayInfo::new(arg.ty, shape.clone()));
            }
        }

        let arg_ids = fdef.arg_nodes()?;
        let ret_ids = fdef.ret_nodes()?;

        let mut child = Importer::new(&mut *self.state, specs);
        child.prepare(&fdef.body)?;
        let func_type = child.infer_function_type(&arg_ids, &ret_ids)?;
        let arg_nodes: Vec<_> = arg_ids.iter().map(|&id| (id, 0)).collect();
        let ret_nodes: Vec<_> = ret_ids.iter().map(|&id| (id, 0)).collect();
        child.convert(ir_name, func_type, &arg_nodes, &ret_nodes, &[], attrs)
    }

    /// Re-inject the removed cycle edges: each recorded back-edge's
    /// merge destination is rebuilt with the feedback value inserted at
    /// its original input position.
    fn add_backedges(&mut self) -> RillResult<()> {
        let mut edges: Vec<RemovedEdge> = self.backedge_dst_input.values().cloned().collect();
        // Records whose endpoints were pruned belong to loops that were
        // dropped wholesale.
        edges.retain(|e| self.graph.contains(e.src) && self.graph.contains(e.dst));
        edges.sort_by_key(|e| self.graph.node(e.dst).name);
        for edge in edges {
            let src_ok = matches!(self.graph.node(edge.src).kind, OpKind::Feedback);
            let dst_ok = matches!(self.graph.node(edge.dst).kind, OpKind::Merge);
            if !src_ok || !dst_ok {
                return Err(Error::failed_precondition(format!(
                    "invalid backedge from `{}' to `{}': expected a loop feedback \
                     node feeding a merge node",
                    self.graph.node(edge.src).name,
                    self.graph.node(edge.dst).name
                )));
            }
            let sink = self
                .node_values
                .get(&edge.src)
                .cloned()
                .ok_or_else(|| Error::internal("feedback source node was not converted"))?;
            let dst_op = self
                .node_values
                .get(&edge.dst)
                .cloned()
                .ok_or_else(|| Error::internal("merge node was not converted"))?;
            let dst_input = edge.dst_input.index().ok_or_else(|| {
                Error::internal("backedge destination is a control port")
            })? as usize;
            let rebuilt = self.add_backedge(&sink, &dst_op, dst_input)?;
            self.node_values.insert(edge.dst, rebuilt);
        }
        Ok(())
    }

    /// Rebuild `dst` with one extra operand, sourced from the feedback
    /// source paired with `sink`, inserted at `dst_input`.
    fn add_backedge(
        &mut self,
        sink: &RRC<Operation>,
        dst: &RRC<Operation>,
        dst_input: usize,
    ) -> RillResult<RRC<Operation>> {
        // The sink's first operand always holds the token linking it to
        // its source.
        let source = sink
            .borrow()
            .operands
            .first()
            .and_then(|v| v.defining_op())
            .ok_or_else(|| Error::internal("feedback sink has no token operand"))?;

        let (name, opcode, location, attributes, result_types, old_operands) = {
            let d = dst.borrow();
            (
                d.name,
                d.opcode,
                d.location.clone(),
                d.attributes.clone(),
                d.result_types.clone(),
                d.operands.clone(),
            )
        };
        if dst_input > old_operands.len() {
            return Err(Error::malformed_structure(format!(
                "backedge input position {} is out of range for `{}'",
                dst_input, name
            )));
        }

        let mut state = OperationState::new(location, name, opcode);
        state.attributes = attributes;
        for ty in result_types {
            state.add_result_type(ty);
        }
        for i in 0..=old_operands.len() {
            use std::cmp::Ordering;
            match i.cmp(&dst_input) {
                Ordering::Less => state.add_operand(old_operands[i].clone()),
                Ordering::Equal => state.add_operand(result(&source, 0)),
                Ordering::Greater => state.add_operand(old_operands[i - 1].clone()),
            }
        }
        let rebuilt = state.build();

        self.region.insert_before(dst, rebuilt.clone());
        self.region.replace_op_uses(dst, &rebuilt);
        self.region.erase(dst);
        Ok(rebuilt)
    }

    /// Substitute block arguments into the use-sites of the argument
    /// nodes, collect the return values, and terminate the regions.
    fn wire_args_and_rets(
        &mut self,
        func: &mut Func,
        func_type: &FunctionType,
        arg_nodes: &[(NodeId, usize)],
        ret_nodes: &[(NodeId, usize)],
        control_ret_nodes: &[NodeId],
    ) -> RillResult<()> {
        for (i, &(id, _port)) in arg_nodes.iter().enumerate() {
            let island = self
                .node_values
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::internal("argument node was not converted"))?;
            let arg_val = Value::Arg {
                index: i,
                ty: func_type.inputs[i].clone(),
            };

            if matches!(self.graph.node(id).kind, OpKind::Arg) {
                // Plain formal parameter: forward the block argument and
                // drop the wrapping island.
                self.region.replace_value_uses(&result(&island, 0), &arg_val);
                self.region.erase(&island);
                continue;
            }

            // An arbitrary node declared as a graph input: synthesize a
            // forwarding operation that takes the block argument as an
            // extra trailing operand.
            let inner = island.borrow().region.ops()[0].clone();
            let mut state = {
                let op = inner.borrow();
                let mut state = OperationState::new(
                    op.location.clone(),
                    Id::new(format!("{}.input", op.name)),
                    Opcode::Generic,
                );
                state.attributes = op.attributes.clone();
                for ty in &op.result_types {
                    state.add_result_type(ty.clone());
                }
                state.add_operands(op.operands.iter().cloned());
                state
            };
            state.add_operand(arg_val);
            let input_op = state.build();
            island.borrow_mut().region.insert_before(&inner, input_op.clone());
            self.region.replace_op_uses(&inner, &input_op);
            island.borrow_mut().region.erase(&inner);
        }

        let mut returns = Vec::with_capacity(ret_nodes.len() + control_ret_nodes.len());
        for &(id, port) in ret_nodes {
            let inst = self
                .node_values
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::internal("return node was not converted"))?;
            if matches!(self.graph.node(id).kind, OpKind::Ret) {
                // Unwrap the return placeholder: use its operand
                // directly and discard the wrapper island.
                let inner = inst.borrow().region.ops()[0].clone();
                let operands = inner.borrow().operands.clone();
                if operands.len() != 1 {
                    return Err(Error::unimplemented("return node with multiple inputs"));
                }
                returns.push(operands[0].clone());
                self.region.erase(&inst);
            } else {
                returns.push(result(&inst, port));
            }
        }
        for &id in control_ret_nodes {
            let inst = self
                .node_values
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::internal("control return node was not converted"))?;
            returns.push(control_result(&inst));
        }

        // Terminate the graph region with a fetch of all returns, and
        // the function body with a return of the graph's results.
        let mut fetch = OperationState::new(Location::Unknown, "rill.fetch", Opcode::Fetch);
        fetch.add_operands(returns);
        self.region.push(fetch.build());

        let mut graph_state =
            OperationState::new(Location::Unknown, "rill.graph", Opcode::Graph);
        for ty in &func_type.results {
            graph_state.add_result_type(ty.clone());
        }
        let graph_op = graph_state.build_with_region(std::mem::take(&mut self.region));

        let mut ret_state =
            OperationState::new(Location::Unknown, "rill.return", Opcode::Return);
        for i in 0..func_type.results.len() {
            ret_state.add_operand(result(&graph_op, i));
        }
        let ret_op = ret_state.build();

        func.body.push(graph_op);
        func.body.push(ret_op);
        Ok(())
    }

    /// Build the location for a node from the debug side table: a plain
    /// name location when nothing is known, a callsite chain when a
    /// trace exists, a fused location when the node derives from
    /// several originals.
    fn location_for(&self, node: &Node) -> Location {
        // Feedback pairs are matched up by location, so use the node
        // name alone to keep it unique.
        if matches!(node.kind, OpKind::Feedback) {
            return self.call_site_for(node.name.as_str(), node.name.as_str());
        }

        if node.original_node_names.is_empty() {
            if self.state.debug_info.trace(node.name.as_str()).is_some() {
                return self.call_site_for(node.name.as_str(), node.name.as_str());
            }
            return Location::name(node.name);
        }

        let mut call_sites = Vec::with_capacity(node.original_node_names.len());
        for (i, original) in node.original_node_names.iter().enumerate() {
            let func = node
                .original_func_names
                .get(i)
                .map(String::as_str)
                .unwrap_or("");
            // The lookup key matches how producers record nodes that
            // came out of function bodies.
            let key = format!("{}@{}", original, func);
            call_sites.push(self.call_site_for(original, &key));
        }
        Location::Fused(call_sites)
    }

    fn call_site_for(&self, name: &str, key: &str) -> Location {
        let frames = match self.state.debug_info.trace(key) {
            Some(frames) if !frames.is_empty() => frames,
            _ => return Location::name(name),
        };
        let locs: Vec<Location> = frames
            .iter()
            .map(|f| Location::file_line_col(f.file.as_str(), f.line, f.col))
            .collect();
        let name_loc = Location::name_at(name, locs[0].clone());
        if locs.len() == 1 {
            return name_loc;
        }
        let mut caller = locs[locs.len() - 1].clone();
        for loc in locs[1..locs.len() - 1].iter().rev() {
            caller = Location::call_site(loc.clone(), caller);
        }
        Location::call_site(name_loc, caller)
    }
}

fn opcode_for(kind: &OpKind) -> Opcode {
    match kind {
        OpKind::Merge => Opcode::Merge,
        OpKind::Switch => Opcode::Switch,
        OpKind::LoopCond => Opcode::LoopCond,
        OpKind::Enter => Opcode::Enter,
        OpKind::Exit => Opcode::Exit,
        OpKind::ControlTrigger => Opcode::ControlTrigger,
        OpKind::Feedback => Opcode::FeedbackSink,
        _ => Opcode::Generic,
    }
}

/// Nodes of `kind` ordered by their dense `index` attribute.
fn collect_indexed(graph: &Graph, kind: &OpKind) -> RillResult<Vec<NodeId>> {
    let mut items: Vec<(i64, NodeId)> = Vec::new();
    for id in graph.node_ids() {
        let node = graph.node(id);
        if node.kind != *kind {
            continue;
        }
        let index = node
            .attrs
            .get("index")
            .and_then(|v| v.as_int())
            .ok_or_else(|| {
                Error::malformed_structure(format!(
                    "node `{}' is missing its index attribute",
                    node.name
                ))
            })?;
        items.push((index, id));
    }
    items.sort_by_key(|&(index, _)| index);
    for (expected, &(index, id)) in items.iter().enumerate() {
        if index != expected as i64 {
            return Err(Error::malformed_structure(format!(
                "node `{}' has index {} where {} was expected",
                graph.node(id).name,
                index,
                expected
            )));
        }
    }
    Ok(items.into_iter().map(|(_, id)| id).collect())
}

/// Rewrite declared-input legacy nodes into plain placeholders before
/// the import proper.
fn rewrite_legacy_inputs(graph: &mut Graph, config: &ImportConfig) -> RillResult<()> {
    let ids: Vec<NodeId> = graph.node_ids().collect();
    for id in ids {
        let node = graph.node(id);
        let is_legacy =
            matches!(&node.kind, OpKind::Operator(op) if *op == "LegacyInput");
        if !is_legacy {
            continue;
        }
        let Some(info) = config.inputs.get(node.name.as_str()) else {
            continue;
        };
        let info = info.clone();
        if graph
            .out_edges(id)
            .iter()
            .any(|(_, e)| matches!(e.src_output, Port::Data(i) if i > 0))
        {
            return Err(Error::invalid_argument(format!(
                "legacy input node `{}' has a non-primary output in use and \
                 cannot be replaced with a placeholder",
                graph.node(id).name
            )));
        }
        for (src, edge) in graph.in_edges(id) {
            graph.remove_edge(src, edge.src_output, id, edge.dst_input);
        }
        let node = graph.node_mut(id);
        node.kind = OpKind::Operator(Id::new("Placeholder"));
        node.attrs.clear();
        node.attrs
            .insert("dtype".into(), AttrValue::Type(info.element));
        node.attrs
            .insert("shape".into(), AttrValue::Shape(info.shape.clone()));
        node.outputs = smallvec![info.element];
    }
    Ok(())
}
