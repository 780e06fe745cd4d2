use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::IrError;
use crate::function::Function;
use crate::types::Signature;

/// A host symbol the module calls but does not define.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternFunction {
    pub name: String,
    pub signature: Signature,
}

/// The unit that is captured, registered, cloned and optimized.
///
/// Symbol names (functions and externs together) are unique. Function order
/// is preserved so printing and code generation are deterministic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub externs: Vec<ExternFunction>,
    pub functions: IndexMap<String, Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            externs: Vec::new(),
            functions: IndexMap::new(),
        }
    }

    pub fn add_function(&mut self, func: Function) -> Result<(), IrError> {
        if self.contains_symbol(&func.name) {
            return Err(IrError::DuplicateSymbol(func.name));
        }
        self.functions.insert(func.name.clone(), func);
        Ok(())
    }

    pub fn declare_extern(
        &mut self,
        name: impl Into<String>,
        signature: Signature,
    ) -> Result<(), IrError> {
        let name = name.into();
        if self.contains_symbol(&name) {
            return Err(IrError::DuplicateSymbol(name));
        }
        self.externs.push(ExternFunction { name, signature });
        Ok(())
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.get_mut(name)
    }

    pub fn extern_fn(&self, name: &str) -> Option<&ExternFunction> {
        self.externs.iter().find(|e| e.name == name)
    }

    pub fn contains_symbol(&self, name: &str) -> bool {
        self.functions.contains_key(name) || self.extern_fn(name).is_some()
    }

    /// Signature of a defined function or declared extern.
    pub fn signature_of(&self, name: &str) -> Option<&Signature> {
        self.function(name)
            .map(|f| &f.signature)
            .or_else(|| self.extern_fn(name).map(|e| &e.signature))
    }

    pub fn instr_count(&self) -> usize {
        self.functions.values().map(Function::instr_count).sum()
    }
}
