//! Read-only program representation handed to the solver.
//!
//! Programs are loaded from JSON or assembled with [`ProgramBuilder`]. A function
//! without blocks is a declaration: its body lives outside the analysed program
//! and calls to it are classified instead of descended into.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use crate::error::Result;

/// Identity of a program value. Values are never merged by name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ValueId(pub u32);

/// Identity of an instruction, unique across the whole program.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InstId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<Function>,
    /// Display names for values; purely cosmetic.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub value_names: BTreeMap<ValueId, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ValueId>,
    /// Index of a hidden output-pointer argument (return slot passed by reference).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_arg: Option<usize>,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub successors: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: InstId,
    pub op: Op,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Call {
        callee: String,
        #[serde(default)]
        args: Vec<ValueId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<ValueId>,
    },
    Return {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<ValueId>,
    },
    Other {
        #[serde(default)]
        text: String,
    },
}

impl Function {
    pub fn has_body(&self) -> bool {
        !self.blocks.is_empty()
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }
}

impl Instruction {
    /// Callee identifier when this instruction is a call.
    pub fn callee(&self) -> Option<&str> {
        match &self.op {
            Op::Call { callee, .. } => Some(callee.as_str()),
            _ => None,
        }
    }
}

impl Program {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Every instruction paired with its enclosing function, in program order.
    pub fn instructions(&self) -> impl Iterator<Item = (&Function, &Instruction)> {
        self.functions
            .iter()
            .flat_map(|f| f.instructions().map(move |inst| (f, inst)))
    }

    /// Human-readable label for a value, falling back to its numeric id.
    pub fn value_label(&self, value: ValueId) -> String {
        match self.value_names.get(&value) {
            Some(name) => format!("%{name}"),
            None => value.to_string(),
        }
    }
}

// ============================================================================
// Declaration Resolver
// ============================================================================

/// What the resolver knows about a callee identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Declaration {
    pub arity: usize,
    pub output_arg: Option<usize>,
    pub has_body: bool,
}

/// Reverse lookup from callee identifiers to declarations, built once per program.
#[derive(Debug, Clone, Default)]
pub struct DeclarationIndex {
    by_name: HashMap<String, Declaration>,
}

impl DeclarationIndex {
    pub fn new(program: &Program) -> Self {
        let mut by_name = HashMap::with_capacity(program.functions.len());
        for f in &program.functions {
            let decl = Declaration {
                arity: f.params.len(),
                output_arg: f.output_arg,
                has_body: f.has_body(),
            };
            // A definition wins over an earlier bodiless declaration of the same symbol.
            by_name
                .entry(f.name.clone())
                .and_modify(|existing: &mut Declaration| {
                    if decl.has_body {
                        *existing = decl;
                    }
                })
                .or_insert(decl);
        }
        Self { by_name }
    }

    pub fn resolve(&self, identifier: &str) -> Option<&Declaration> {
        self.by_name.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles programs in code with fresh value and instruction ids.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
    next_value: u32,
    next_inst: u32,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh value with a display name.
    pub fn value(&mut self, name: &str) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        self.program.value_names.insert(id, name.to_string());
        id
    }

    /// Declare a body-less function.
    pub fn declare(&mut self, name: &str, arity: usize, output_arg: Option<usize>) -> &mut Self {
        let params = (0..arity).map(|i| self.value(&format!("{name}.arg{i}"))).collect();
        self.program.functions.push(Function {
            name: name.to_string(),
            params,
            output_arg,
            blocks: Vec::new(),
        });
        self
    }

    /// Define a function; `body` emits its instructions starting in block 0.
    pub fn define(
        &mut self,
        name: &str,
        params: &[ValueId],
        body: impl FnOnce(&mut FunctionBuilder<'_>),
    ) -> &mut Self {
        let mut fb = FunctionBuilder {
            next_inst: &mut self.next_inst,
            blocks: vec![Block::default()],
            current: 0,
        };
        body(&mut fb);
        let blocks = fb.blocks;
        self.program.functions.push(Function {
            name: name.to_string(),
            params: params.to_vec(),
            output_arg: None,
            blocks,
        });
        self
    }

    pub fn build(self) -> Program {
        self.program
    }
}

/// Emits instructions into the blocks of one function.
#[derive(Debug)]
pub struct FunctionBuilder<'a> {
    next_inst: &'a mut u32,
    blocks: Vec<Block>,
    current: usize,
}

impl FunctionBuilder<'_> {
    fn push(&mut self, op: Op) -> InstId {
        let id = InstId(*self.next_inst);
        *self.next_inst += 1;
        self.blocks[self.current]
            .instructions
            .push(Instruction { id, op });
        id
    }

    pub fn call(&mut self, callee: &str, args: &[ValueId], result: Option<ValueId>) -> InstId {
        self.push(Op::Call {
            callee: callee.to_string(),
            args: args.to_vec(),
            result,
        })
    }

    pub fn ret(&mut self, value: Option<ValueId>) -> InstId {
        self.push(Op::Return { value })
    }

    pub fn other(&mut self, text: &str) -> InstId {
        self.push(Op::Other {
            text: text.to_string(),
        })
    }

    /// Open a new block and make it current. Returns its index.
    pub fn new_block(&mut self) -> usize {
        self.blocks.push(Block::default());
        self.current = self.blocks.len() - 1;
        self.current
    }

    pub fn switch_to(&mut self, block: usize) {
        self.current = block;
    }

    pub fn edge(&mut self, from: usize, to: usize) {
        self.blocks[from].successors.push(to);
    }
}
