//! Operator definitions: the serialized-graph view of one operator.
//!
//! A definition names the operator type and carries a bag of typed,
//! name-addressed arguments. Lookups take a default so graph files only
//! need to spell out what differs from it, mirroring how converted models
//! omit arguments left at their canonical values.

use std::collections::HashMap;

/// One typed argument value attached to an operator definition.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// Textual argument, e.g. an activation name.
    Str(String),
    /// Scalar float argument, e.g. a clamp limit.
    F32(f32),
    /// Scalar integer argument, e.g. a flag.
    I64(i64),
    /// Integer-list argument, e.g. strides.
    IntList(Vec<i64>),
}

/// A named operator with its input/output tensor names and argument bag.
#[derive(Debug, Clone, Default)]
pub struct OpDef {
    op_type: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    args: HashMap<String, ArgValue>,
}

impl OpDef {
    /// The operator type name, e.g. `"Conv2D"`.
    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    /// Names of the input tensors, in binding order.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Names of the output tensors.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// String argument by name, or `default` when absent or of another
    /// type.
    pub fn str_arg<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        match self.args.get(name) {
            Some(ArgValue::Str(s)) => s,
            _ => default,
        }
    }

    /// Float argument by name, or `default` when absent.
    pub fn f32_arg(&self, name: &str, default: f32) -> f32 {
        match self.args.get(name) {
            Some(ArgValue::F32(v)) => *v,
            _ => default,
        }
    }

    /// Integer argument by name, or `default` when absent.
    pub fn i64_arg(&self, name: &str, default: i64) -> i64 {
        match self.args.get(name) {
            Some(ArgValue::I64(v)) => *v,
            _ => default,
        }
    }

    /// Integer-list argument by name, or `default` when absent.
    pub fn ints_arg<'a>(&'a self, name: &str, default: &'a [i64]) -> &'a [i64] {
        match self.args.get(name) {
            Some(ArgValue::IntList(v)) => v,
            _ => default,
        }
    }
}

/// Builder for [`OpDef`], used by tests and by graph loaders.
#[derive(Debug, Default)]
pub struct OpDefBuilder {
    def: OpDef,
}

impl OpDefBuilder {
    /// Starts a definition for the given operator type.
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            def: OpDef {
                op_type: op_type.into(),
                inputs: Vec::new(),
                outputs: Vec::new(),
                args: HashMap::new(),
            },
        }
    }

    /// Appends an input tensor name.
    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.def.inputs.push(name.into());
        self
    }

    /// Appends an output tensor name.
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.def.outputs.push(name.into());
        self
    }

    /// Attaches a string argument.
    pub fn str_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.def.args.insert(name.into(), ArgValue::Str(value.into()));
        self
    }

    /// Attaches a float argument.
    pub fn f32_arg(mut self, name: impl Into<String>, value: f32) -> Self {
        self.def.args.insert(name.into(), ArgValue::F32(value));
        self
    }

    /// Attaches an integer argument.
    pub fn i64_arg(mut self, name: impl Into<String>, value: i64) -> Self {
        self.def.args.insert(name.into(), ArgValue::I64(value));
        self
    }

    /// Attaches an integer-list argument.
    pub fn ints_arg(mut self, name: impl Into<String>, value: Vec<i64>) -> Self {
        self.def.args.insert(name.into(), ArgValue::IntList(value));
        self
    }

    /// Finishes the definition.
    pub fn build(self) -> OpDef {
        self.def
    }
}
