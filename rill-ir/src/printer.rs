//! Textual rendering of a module. The format is stable: two imports of
//! the same graph print identically.

use crate::{Func, Module, Operation, Region, Value, RRC};
use itertools::Itertools;
use std::collections::HashMap;
use std::fmt::Write;
use std::rc::Rc;

/// Pretty-printer for modules, functions, and operations.
#[derive(Default)]
pub struct Printer {
    /// Operation pointer to assigned SSA number.
    numbers: HashMap<usize, usize>,
    next: usize,
}

impl Printer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn print_module(mut self, module: &Module) -> String {
        let mut out = String::new();
        let v = &module.versions;
        let bad = v
            .bad_consumers
            .iter()
            .map(|c| c.to_string())
            .join(", ");
        let _ = writeln!(
            out,
            "module attributes {{versions = {{producer = {}, min_consumer = {}, bad_consumers = [{}]}}}} {{",
            v.producer, v.min_consumer, bad
        );
        for func in module.functions() {
            self.print_func(func, &mut out);
        }
        out.push_str("}\n");
        out
    }

    fn print_func(&mut self, func: &Func, out: &mut String) {
        let _ = write!(out, "  func @{}{}", func.name, func.signature);
        if !func.attributes.is_empty() {
            let attrs = func
                .attributes
                .iter()
                .map(|a| format!("{} = {}", a.name, a.value))
                .join(", ");
            let _ = write!(out, " attributes {{{}}}", attrs);
        }
        out.push_str(" {\n");
        self.print_region(&func.body, 4, out);
        out.push_str("  }\n");
    }

    fn print_region(&mut self, region: &Region, indent: usize, out: &mut String) {
        for op in region.ops() {
            self.print_op(op, indent, out);
        }
    }

    fn print_op(&mut self, op: &RRC<Operation>, indent: usize, out: &mut String) {
        let key = Rc::as_ptr(op) as usize;
        let number = self.next;
        let inner = op.borrow();
        for _ in 0..indent {
            out.push(' ');
        }
        if !inner.result_types.is_empty() {
            self.numbers.insert(key, number);
            self.next += 1;
            if inner.result_types.len() == 1 {
                let _ = write!(out, "%{} = ", number);
            } else {
                let _ = write!(out, "%{}:{} = ", number, inner.result_types.len());
            }
        }
        let _ = write!(out, "{}", inner.name);
        if !inner.operands.is_empty() {
            let rendered = inner
                .operands
                .iter()
                .map(|v| self.render_value(v))
                .join(", ");
            let _ = write!(out, " {}", rendered);
        }
        if !inner.attributes.is_empty() {
            let attrs = inner
                .attributes
                .iter()
                .map(|a| format!("{} = {}", a.name, a.value))
                .join(", ");
            let _ = write!(out, " {{{}}}", attrs);
        }
        if !inner.result_types.is_empty() {
            let tys = inner
                .result_types
                .iter()
                .map(|t| t.to_string())
                .join(", ");
            let _ = write!(out, " : {}", tys);
        }
        let _ = write!(out, " {}", inner.location);
        if !inner.region.is_empty() {
            out.push_str(" {\n");
            self.print_region(&inner.region, indent + 2, out);
            for _ in 0..indent {
                out.push(' ');
            }
            out.push('}');
        }
        out.push('\n');
    }

    fn render_value(&self, value: &Value) -> String {
        match value {
            Value::Result { op, index } => {
                let key = Rc::as_ptr(op) as usize;
                match self.numbers.get(&key) {
                    Some(n) if op.borrow().result_types.len() == 1 => format!("%{}", n),
                    Some(n) => format!("%{}#{}", n, index),
                    // Forward reference: fall back to the op name.
                    None => format!("%<{}>#{}", op.borrow().name, index),
                }
            }
            Value::Arg { index, .. } => format!("%arg{}", index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        result, Attribute, FunctionType, Location, Opcode, OperationState, Type,
    };
    use rill_graph::{ElementType, ShapeHandle, TensorType};

    #[test]
    fn prints_a_minimal_function() {
        let mut state = OperationState::new(
            Location::name("c"),
            "rill.Const",
            Opcode::Generic,
        );
        state.add_result_type(Type::Tensor(TensorType::new(
            ElementType::I32,
            ShapeHandle::scalar(),
        )));
        state.add_attribute("name", Attribute::Str("c".into()));
        let konst = state.build();

        let mut fetch =
            OperationState::new(Location::Unknown, "rill.fetch", Opcode::Fetch);
        fetch.add_operand(result(&konst, 0));
        let fetch = fetch.build();

        let mut func = Func::new(
            "main",
            FunctionType::new(
                vec![],
                vec![Type::Tensor(TensorType::new(
                    ElementType::I32,
                    ShapeHandle::scalar(),
                ))],
            ),
        );
        func.body.push(konst);
        func.body.push(fetch);

        let mut module = Module::new();
        module.push(func);
        let text = Printer::new().print_module(&module);
        assert!(text.contains("func @main"));
        assert!(text.contains("rill.Const"));
        assert!(text.contains("rill.fetch %0"));
    }
}
