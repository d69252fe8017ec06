//! Textual IR output
//!
//! The format follows LLVM assembly closely enough to be read by anyone who
//! knows it. Names come from the hints recorded at build time and are made
//! unique per function by appending a counter, in layout order, so the same
//! module always prints the same way.

use crate::{
    BlockId, Function, GlobalId, InstId, InstKind, Module, SlotType, Terminator, Type, Value,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt::{self, Write};

/// Hands out unique names within one namespace
#[derive(Default)]
struct Namer {
    taken: FxHashSet<String>,
    suffixes: FxHashMap<String, u32>,
    anonymous: u32,
}

impl Namer {
    fn fresh(&mut self, hint: &str) -> String {
        if hint.is_empty() {
            loop {
                let candidate = self.anonymous.to_string();
                self.anonymous += 1;
                if self.taken.insert(candidate.clone()) {
                    return candidate;
                }
            }
        }

        if self.taken.insert(hint.to_owned()) {
            return hint.to_owned();
        }
        let suffix = self.suffixes.entry(hint.to_owned()).or_insert(0);
        loop {
            *suffix += 1;
            let candidate = format!("{hint}{suffix}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

/// Resolved names of everything visible inside one function
struct FunctionNames {
    params: Vec<String>,
    values: FxHashMap<Value, String>,
    blocks: FxHashMap<BlockId, String>,
}

impl FunctionNames {
    fn new(module: &Module, function: &Function) -> Self {
        let mut namer = Namer::default();
        let params = function
            .params
            .iter()
            .map(|&param| namer.fresh(module.resolve(param)))
            .collect();

        let mut values = FxHashMap::default();
        let mut blocks = FxHashMap::default();
        for &block in function.layout() {
            let data = function.block(block);
            blocks.insert(block, namer.fresh(&data.name));
            for &inst in &data.insts {
                let inst_data = function.inst(inst);
                if !matches!(inst_data.kind, InstKind::Store { .. }) {
                    values.insert(Value::Inst(inst), namer.fresh(&inst_data.name));
                }
            }
        }

        Self {
            params,
            values,
            blocks,
        }
    }

    fn block(&self, block: BlockId) -> &str {
        self.blocks.get(&block).map_or("<detached>", String::as_str)
    }
}

struct Printer<'module> {
    module: &'module Module,
    globals: FxHashMap<GlobalId, String>,
}

impl<'module> Printer<'module> {
    fn new(module: &'module Module) -> Self {
        let mut namer = Namer::default();
        let globals = module
            .globals()
            .map(|(id, global)| (id, namer.fresh(module.resolve(global.name))))
            .collect();
        Self { module, globals }
    }

    fn operand(&self, names: &FunctionNames, value: Value) -> String {
        match value {
            Value::Float(constant) => format_float(constant.value()),
            Value::Int(value) => value.to_string(),
            Value::Undef => "undef".to_owned(),
            Value::Param(idx) => names
                .params
                .get(idx as usize)
                .map_or_else(|| format!("%arg{idx}"), |name| format!("%{name}")),
            Value::Inst(_) => names
                .values
                .get(&value)
                .map_or_else(|| "%<badref>".to_owned(), |name| format!("%{name}")),
            Value::Global(id) => format!("@{}", self.global_name(id)),
        }
    }

    fn typed(&self, function: &Function, names: &FunctionNames, value: Value) -> String {
        format!(
            "{} {}",
            function.value_type(value),
            self.operand(names, value)
        )
    }

    fn global_name(&self, id: GlobalId) -> &str {
        self.globals.get(&id).map_or("<unknown>", String::as_str)
    }

    fn write_module(&self, out: &mut impl Write) -> fmt::Result {
        writeln!(out, "; ModuleID = '{}'", self.module.name)?;

        let mut globals = self.module.globals().peekable();
        if globals.peek().is_some() {
            writeln!(out)?;
        }
        for (id, global) in globals {
            let init = match global.ty {
                SlotType::Scalar => format_float(0.0),
                SlotType::Array(_) => "zeroinitializer".to_owned(),
            };
            writeln!(
                out,
                "@{} = common global {} {init}",
                self.global_name(id),
                global.ty
            )?;
        }

        for function in self.module.functions() {
            writeln!(out)?;
            self.write_function(out, function)?;
        }
        Ok(())
    }

    fn write_function(&self, out: &mut impl Write, function: &Function) -> fmt::Result {
        let names = FunctionNames::new(self.module, function);
        let params = names
            .params
            .iter()
            .map(|name| format!("double %{name}"))
            .collect::<Vec<_>>()
            .join(", ");
        let name = self.module.resolve(function.name);

        if function.is_declaration() {
            return writeln!(out, "declare double @{name}({params})");
        }

        writeln!(out, "define double @{name}({params}) {{")?;
        for (position, &block) in function.layout().iter().enumerate() {
            if position > 0 {
                writeln!(out)?;
            }
            writeln!(out, "{}:", names.block(block))?;
            let data = function.block(block);
            for &inst in &data.insts {
                write!(out, "  ")?;
                self.write_inst(out, function, &names, inst)?;
                writeln!(out)?;
            }
            match data.terminator {
                Some(terminator) => {
                    write!(out, "  ")?;
                    self.write_terminator(out, function, &names, terminator)?;
                    writeln!(out)?;
                }
                None => writeln!(out, "  ; missing terminator")?,
            }
        }
        writeln!(out, "}}")
    }

    fn write_inst(
        &self,
        out: &mut impl Write,
        function: &Function,
        names: &FunctionNames,
        inst: InstId,
    ) -> fmt::Result {
        let value = Value::Inst(inst);
        let kind = &function.inst(inst).kind;
        if !matches!(kind, InstKind::Store { .. }) {
            write!(out, "{} = ", self.operand(names, value))?;
        }

        let op = |value| self.operand(names, value);
        let typed = |value| self.typed(function, names, value);
        match kind {
            InstKind::Alloca { ty } => write!(out, "alloca {ty}"),
            InstKind::Load { ptr } => write!(out, "load double, {}", typed(*ptr)),
            InstKind::Store { value, ptr } => {
                write!(out, "store {}, {}", typed(*value), typed(*ptr))
            }
            InstKind::Binary { op: binop, lhs, rhs } => {
                write!(out, "{binop} {}, {}", typed(*lhs), op(*rhs))
            }
            InstKind::FCmp { pred, lhs, rhs } => {
                write!(out, "fcmp {pred} {}, {}", typed(*lhs), op(*rhs))
            }
            InstKind::FNeg { operand } => write!(out, "fneg {}", typed(*operand)),
            InstKind::Not { operand } => write!(out, "xor {}, true", typed(*operand)),
            InstKind::FpToSi { value } => {
                write!(out, "fptosi {} to {}", typed(*value), Type::Int)
            }
            InstKind::UiToFp { value } => {
                write!(out, "uitofp {} to {}", typed(*value), Type::Double)
            }
            InstKind::ElementPtr { base, ty, index } => write!(
                out,
                "getelementptr {ty}, {}, i64 0, {}",
                typed(*base),
                typed(*index)
            ),
            InstKind::Call { callee, args } => {
                let args = args
                    .iter()
                    .map(|&arg| typed(arg))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(
                    out,
                    "call double @{}({args})",
                    self.module.resolve(*callee)
                )
            }
            InstKind::Phi { ty, incoming } => {
                let incoming = incoming
                    .iter()
                    .map(|&(value, block)| format!("[ {}, %{} ]", op(value), names.block(block)))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(out, "phi {ty} {incoming}")
            }
        }
    }

    fn write_terminator(
        &self,
        out: &mut impl Write,
        function: &Function,
        names: &FunctionNames,
        terminator: Terminator,
    ) -> fmt::Result {
        match terminator {
            Terminator::Br(dest) => write!(out, "br label %{}", names.block(dest)),
            Terminator::CondBr {
                cond,
                then_dest,
                else_dest,
            } => write!(
                out,
                "br {}, label %{}, label %{}",
                self.typed(function, names, cond),
                names.block(then_dest),
                names.block(else_dest)
            ),
            Terminator::Ret(value) => write!(out, "ret {}", self.typed(function, names, value)),
        }
    }
}

fn format_float(value: f64) -> String {
    format!("{value:.6e}")
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Printer::new(self).write_module(f)
    }
}

/// Renders a single function of `module`
pub fn print_function(module: &Module, function: &Function) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    if Printer::new(module).write_function(&mut out, function).is_err() {
        out.clear();
    }
    out
}
