//! JSON frontend for the `rill` binary: deserializes a graph
//! description (nodes, function library, debug traces, import
//! configuration) and builds the in-memory structures the importer
//! consumes. Input edges use the conventional string forms `name`,
//! `name:2`, and `^name` for control dependencies.

use rill_graph::{
    ArgDef, AttrList, AttrValue, DebugInfo, ElementType, FileLineCol, FuncAttr, FunctionDef,
    FunctionLibrary, Graph, Node, OpKind, ShapeHandle, TensorData, TensorValue, VersionDef,
};
use rill_import::{ArrayInfo, ImportConfig};
use rill_utils::{Error, Id, RillResult};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Deserialize)]
pub struct FileModel {
    #[serde(default)]
    pub versions: VersionModel,
    #[serde(default)]
    pub nodes: Vec<NodeModel>,
    #[serde(default)]
    pub functions: Vec<FunctionModel>,
    #[serde(default)]
    pub gradients: HashMap<String, String>,
    #[serde(default)]
    pub debug_info: HashMap<String, Vec<FrameModel>>,
    #[serde(default)]
    pub config: ConfigModel,
}

#[derive(Deserialize, Default)]
pub struct VersionModel {
    #[serde(default)]
    pub producer: i32,
    #[serde(default)]
    pub min_consumer: i32,
    #[serde(default)]
    pub bad_consumers: Vec<i32>,
}

#[derive(Deserialize)]
pub struct NodeModel {
    pub name: String,
    pub op: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub attrs: HashMap<String, AttrModel>,
    #[serde(default)]
    pub original_nodes: Vec<String>,
    #[serde(default)]
    pub original_funcs: Vec<String>,
}

#[derive(Deserialize)]
pub struct FunctionModel {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<(String, String)>,
    #[serde(default)]
    pub outputs: Vec<(String, String)>,
    #[serde(default)]
    pub stateful: bool,
    #[serde(default)]
    pub attrs: HashMap<String, AttrModel>,
    #[serde(default)]
    pub nodes: Vec<NodeModel>,
}

#[derive(Deserialize)]
pub struct FrameModel {
    pub file: String,
    pub line: u32,
    #[serde(default)]
    pub col: u32,
}

#[derive(Deserialize, Default)]
pub struct ConfigModel {
    #[serde(default)]
    pub inputs: HashMap<String, InputModel>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub prune_unused_nodes: bool,
    #[serde(default)]
    pub graph_as_function: bool,
    #[serde(default)]
    pub convert_legacy_inputs: bool,
}

#[derive(Deserialize)]
pub struct InputModel {
    pub dtype: String,
    /// `null` means unranked; `-1` entries are unknown dimensions.
    #[serde(default)]
    pub shape: Option<Vec<i64>>,
}

/// One attribute value; exactly one field should be set.
#[derive(Deserialize)]
pub struct AttrModel {
    pub int: Option<i64>,
    pub str: Option<String>,
    pub float: Option<f32>,
    pub bool: Option<bool>,
    pub dtype: Option<String>,
    #[serde(default, with = "shape_opt")]
    pub shape: Option<Option<Vec<i64>>>,
    pub tensor: Option<TensorModel>,
    pub list: Option<ListModel>,
    pub func: Option<FuncModel>,
}

// `"shape": null` inside an attribute means an unranked shape, which is
// different from the key being absent; keep the two apart.
mod shape_opt {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(d: D) -> Result<Option<Option<Vec<i64>>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Some(Option::<Vec<i64>>::deserialize(d)?))
    }
}

#[derive(Deserialize)]
pub struct TensorModel {
    pub dtype: String,
    #[serde(default)]
    pub dims: Vec<i64>,
    pub data: serde_json::Value,
}

#[derive(Deserialize, Default)]
pub struct ListModel {
    #[serde(default)]
    pub ints: Vec<i64>,
    #[serde(default)]
    pub strs: Vec<String>,
    #[serde(default)]
    pub floats: Vec<f32>,
    #[serde(default)]
    pub bools: Vec<bool>,
    #[serde(default)]
    pub dtypes: Vec<String>,
    #[serde(default)]
    pub shapes: Vec<Option<Vec<i64>>>,
    #[serde(default)]
    pub funcs: Vec<FuncModel>,
}

#[derive(Deserialize)]
pub struct FuncModel {
    pub name: String,
    #[serde(default)]
    pub attrs: HashMap<String, AttrModel>,
}

/// Everything the importer needs, decoded from one JSON file.
pub struct LoadedGraph {
    pub graph: Graph,
    pub library: FunctionLibrary,
    pub debug_info: DebugInfo,
    pub config: ImportConfig,
}

pub fn load(text: &str) -> RillResult<LoadedGraph> {
    let model: FileModel = serde_json::from_str(text)
        .map_err(|e| Error::invalid_argument(format!("malformed input file: {}", e)))?;

    let mut graph = build_graph(&model.nodes)?;
    graph.versions = VersionDef {
        producer: model.versions.producer,
        min_consumer: model.versions.min_consumer,
        bad_consumers: model.versions.bad_consumers.clone(),
    };

    let mut library = FunctionLibrary::new();
    for func in &model.functions {
        let body = build_graph(&func.nodes)?;
        let mut def = FunctionDef::new(func.name.as_str(), body);
        def.input_args = func
            .inputs
            .iter()
            .map(|(name, ty)| Ok(ArgDef::new(name.as_str(), parse_dtype(ty)?)))
            .collect::<RillResult<_>>()?;
        def.output_args = func
            .outputs
            .iter()
            .map(|(name, ty)| Ok(ArgDef::new(name.as_str(), parse_dtype(ty)?)))
            .collect::<RillResult<_>>()?;
        def.stateful = func.stateful;
        for (key, value) in &func.attrs {
            def.attrs.insert(key.clone(), convert_attr(value)?);
        }
        library.insert(def);
    }
    for (func, grad) in &model.gradients {
        library.set_gradient(func.as_str(), grad.as_str());
    }

    let mut debug_info = DebugInfo::new();
    for (key, frames) in &model.debug_info {
        debug_info.insert(
            key.clone(),
            frames
                .iter()
                .map(|f| FileLineCol::new(f.file.clone(), f.line, f.col))
                .collect(),
        );
    }

    let mut config = ImportConfig {
        prune_unused_nodes: model.config.prune_unused_nodes,
        graph_as_function: model.config.graph_as_function,
        convert_legacy_inputs: model.config.convert_legacy_inputs,
        ..ImportConfig::default()
    };
    for (name, input) in &model.config.inputs {
        config.inputs.insert(
            name.clone(),
            ArrayInfo::new(parse_dtype(&input.dtype)?, parse_shape(&input.shape)),
        );
    }
    config.outputs = model.config.outputs.clone();

    Ok(LoadedGraph {
        graph,
        library,
        debug_info,
        config,
    })
}

fn build_graph(nodes: &[NodeModel]) -> RillResult<Graph> {
    let mut graph = Graph::new();
    let mut ids = HashMap::new();
    for model in nodes {
        let mut node = Node::new(model.name.as_str(), parse_kind(&model.op));
        for ty in &model.outputs {
            node = node.with_output(parse_dtype(ty)?);
        }
        node.device = model.device.clone();
        node.original_node_names = model.original_nodes.clone();
        node.original_func_names = model.original_funcs.clone();
        for (key, value) in &model.attrs {
            node.attrs.insert(key.clone(), convert_attr(value)?);
        }
        let id = graph.add_node(node)?;
        ids.insert(model.name.clone(), id);
    }
    // Edges resolve after all nodes exist.
    for model in nodes {
        let dst = ids[&model.name];
        let mut data_input = 0u32;
        for input in &model.inputs {
            if let Some(src_name) = input.strip_prefix('^') {
                let src = *ids.get(src_name).ok_or_else(|| {
                    Error::invalid_argument(format!("unknown input node `{}'", src_name))
                })?;
                graph.add_control_edge(src, dst);
                continue;
            }
            let (src_name, port) = match input.split_once(':') {
                Some((name, port)) => (
                    name,
                    port.parse::<u32>().map_err(|_| {
                        Error::invalid_argument(format!("bad input spec `{}'", input))
                    })?,
                ),
                None => (input.as_str(), 0),
            };
            let src = *ids.get(src_name).ok_or_else(|| {
                Error::invalid_argument(format!("unknown input node `{}'", src_name))
            })?;
            graph.add_edge(src, port, dst, data_input);
            data_input += 1;
        }
    }
    graph.fixup_source_and_sink();
    Ok(graph)
}

fn parse_kind(op: &str) -> OpKind {
    match op {
        "Merge" => OpKind::Merge,
        "Switch" => OpKind::Switch,
        "LoopCond" => OpKind::LoopCond,
        "Enter" => OpKind::Enter,
        "Exit" => OpKind::Exit,
        "Feedback" => OpKind::Feedback,
        "ControlTrigger" => OpKind::ControlTrigger,
        "Arg" => OpKind::Arg,
        "Ret" => OpKind::Ret,
        other => OpKind::Operator(Id::new(other)),
    }
}

fn parse_dtype(name: &str) -> RillResult<ElementType> {
    ElementType::parse(name)
        .ok_or_else(|| Error::invalid_argument(format!("unknown element type `{}'", name)))
}

fn parse_shape(dims: &Option<Vec<i64>>) -> ShapeHandle {
    match dims {
        None => ShapeHandle::Unranked,
        Some(dims) => ShapeHandle::ranked(dims.iter().copied()),
    }
}

fn convert_attr(model: &AttrModel) -> RillResult<AttrValue> {
    if let Some(i) = model.int {
        return Ok(AttrValue::Int(i));
    }
    if let Some(s) = &model.str {
        return Ok(AttrValue::Str(s.clone()));
    }
    if let Some(f) = model.float {
        return Ok(AttrValue::Float(f));
    }
    if let Some(b) = model.bool {
        return Ok(AttrValue::Bool(b));
    }
    if let Some(t) = &model.dtype {
        return Ok(AttrValue::Type(parse_dtype(t)?));
    }
    if let Some(shape) = &model.shape {
        return Ok(AttrValue::Shape(parse_shape(shape)));
    }
    if let Some(t) = &model.tensor {
        return Ok(AttrValue::Tensor(convert_tensor(t)?));
    }
    if let Some(list) = &model.list {
        return Ok(AttrValue::List(convert_list(list)?));
    }
    if let Some(func) = &model.func {
        return Ok(AttrValue::Func(convert_func(func)?));
    }
    Ok(AttrValue::Unset)
}

fn convert_list(model: &ListModel) -> RillResult<AttrList> {
    let mut list = AttrList {
        ints: model.ints.clone(),
        strs: model.strs.clone(),
        floats: model.floats.clone(),
        bools: model.bools.clone(),
        ..AttrList::default()
    };
    for ty in &model.dtypes {
        list.types.push(parse_dtype(ty)?);
    }
    for shape in &model.shapes {
        list.shapes.push(parse_shape(shape));
    }
    for func in &model.funcs {
        list.funcs.push(convert_func(func)?);
    }
    Ok(list)
}

fn convert_func(model: &FuncModel) -> RillResult<FuncAttr> {
    let mut func = FuncAttr::new(model.name.clone());
    for (key, value) in &model.attrs {
        func.attrs.insert(key.clone(), convert_attr(value)?);
    }
    Ok(func)
}

fn convert_tensor(model: &TensorModel) -> RillResult<TensorValue> {
    let dtype = parse_dtype(&model.dtype)?;
    let values = model.data.as_array().ok_or_else(|| {
        Error::invalid_argument("tensor data must be an array".to_string())
    })?;
    let data = match dtype {
        ElementType::F32 => TensorData::F32(
            values
                .iter()
                .map(|v| v.as_f64().map(|f| f as f32))
                .collect::<Option<_>>()
                .ok_or_else(|| Error::invalid_argument("non-numeric tensor element"))?,
        ),
        ElementType::F64 => TensorData::F64(
            values
                .iter()
                .map(|v| v.as_f64())
                .collect::<Option<_>>()
                .ok_or_else(|| Error::invalid_argument("non-numeric tensor element"))?,
        ),
        ElementType::I32 => TensorData::I32(
            values
                .iter()
                .map(|v| v.as_i64().map(|i| i as i32))
                .collect::<Option<_>>()
                .ok_or_else(|| Error::invalid_argument("non-integer tensor element"))?,
        ),
        ElementType::I64 => TensorData::I64(
            values
                .iter()
                .map(|v| v.as_i64())
                .collect::<Option<_>>()
                .ok_or_else(|| Error::invalid_argument("non-integer tensor element"))?,
        ),
        ElementType::Bool => TensorData::Bool(
            values
                .iter()
                .map(|v| v.as_bool())
                .collect::<Option<_>>()
                .ok_or_else(|| Error::invalid_argument("non-boolean tensor element"))?,
        ),
        ElementType::Str => TensorData::Str(
            values
                .iter()
                .map(|v| v.as_str().map(String::from))
                .collect::<Option<_>>()
                .ok_or_else(|| Error::invalid_argument("non-string tensor element"))?,
        ),
        other => {
            return Err(Error::invalid_argument(format!(
                "unsupported tensor element type `{}'",
                other
            )))
        }
    };
    TensorValue::new(model.dims.iter().copied(), data)
}
