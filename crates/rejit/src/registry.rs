//! The table from native function identity to captured IR.
//!
//! Registration is the boundary with whatever produced the IR (a build step,
//! a hand-written module, a serialized file). The specializer only reads.
//!
//! Compiled specializations run the registered IR directly, and nothing here
//! can prove that IR memory-safe. Registering a module or a raw host address
//! is therefore `unsafe`; the caller vouches for what it hands over.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rejit_ir::{IrError, Module, Signature, from_bytes, verify_module};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::error::{Error, Result};
use crate::signature::JitFn;

/// Identity of a native function: its address in the running process.
///
/// Only meaningful within one process run; never persist it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionId(usize);

impl FunctionId {
    pub const fn from_addr(addr: usize) -> Self {
        Self(addr)
    }

    pub fn of<F: JitFn>(f: F) -> Self {
        Self(f.addr())
    }

    pub fn addr(self) -> usize {
        self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn@{:#x}", self.0)
    }
}

impl fmt::Debug for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0} is already registered")]
    Duplicate(FunctionId),

    #[error("module `{module}` does not define `{entry}`")]
    MissingEntry { module: String, entry: String },

    #[error("`{entry}` has signature {ir} but the native function has {native}")]
    SignatureMismatch {
        entry: String,
        ir: Signature,
        native: Signature,
    },

    #[error("host symbol `{0}` is already registered")]
    DuplicateSymbol(String),

    #[error("captured module is invalid: {0}")]
    InvalidModule(#[source] IrError),
}

/// A registry entry: the module and the function in it that the id denotes.
#[derive(Debug, Clone)]
pub struct RegisteredFunction {
    pub id: FunctionId,
    pub entry: String,
    pub module: Arc<Module>,
}

impl RegisteredFunction {
    pub fn signature(&self) -> Option<&Signature> {
        self.module.function(&self.entry).map(|f| &f.signature)
    }
}

/// A host function captured modules may import.
#[derive(Debug, Clone)]
struct HostSymbol {
    addr: usize,
    /// Known when registered from a typed function pointer.
    signature: Option<Signature>,
}

#[derive(Default)]
pub struct Registry {
    functions: RwLock<FxHashMap<FunctionId, RegisteredFunction>>,
    symbols: RwLock<FxHashMap<String, HostSymbol>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `module` as the representation of `id`, whose body is the
    /// function named `entry`. The module is verified first.
    ///
    /// # Safety
    ///
    /// The entry must behave like the native function `id` names, and every
    /// function in the module must be memory-safe for every argument the
    /// native function accepts. Specializations built from it are called
    /// through safe code.
    pub unsafe fn register(
        &self,
        id: FunctionId,
        entry: impl Into<String>,
        module: Module,
    ) -> Result<(), RegistryError> {
        let entry = entry.into();
        if module.function(&entry).is_none() {
            return Err(RegistryError::MissingEntry {
                module: module.name.clone(),
                entry,
            });
        }
        verify_module(&module).map_err(RegistryError::InvalidModule)?;

        let mut functions = self.functions.write();
        if functions.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        tracing::debug!(%id, entry = %entry, module = %module.name, "registered function");
        functions.insert(
            id,
            RegisteredFunction {
                id,
                entry,
                module: Arc::new(module),
            },
        );
        Ok(())
    }

    /// Like [`Registry::register`], keyed by a native function pointer whose
    /// Rust signature must agree with the IR entry.
    ///
    /// # Safety
    ///
    /// Same contract as [`Registry::register`], with `f` as the native
    /// function.
    pub unsafe fn register_fn<F: JitFn>(
        &self,
        f: F,
        entry: impl Into<String>,
        module: Module,
    ) -> Result<FunctionId, RegistryError> {
        let entry = entry.into();
        let native = F::signature();
        if let Some(func) = module.function(&entry) {
            if func.signature != native {
                return Err(RegistryError::SignatureMismatch {
                    entry,
                    ir: func.signature.clone(),
                    native,
                });
            }
        }
        let id = FunctionId::of(f);
        // SAFETY: forwarded from the caller.
        unsafe { self.register(id, entry, module)? };
        Ok(id)
    }

    /// Registers a module in its binary encoding.
    ///
    /// # Safety
    ///
    /// Same contract as [`Registry::register`] for the decoded module.
    pub unsafe fn register_serialized(
        &self,
        id: FunctionId,
        entry: impl Into<String>,
        bytes: &[u8],
    ) -> Result<(), RegistryError> {
        let module = from_bytes(bytes).map_err(RegistryError::InvalidModule)?;
        // SAFETY: forwarded from the caller.
        unsafe { self.register(id, entry, module) }
    }

    /// Makes a host function callable from captured modules that declare
    /// `extern @name`.
    ///
    /// # Safety
    ///
    /// `addr` must be the address of an `extern "C"` function whose
    /// signature matches every `extern @name` declaration that will be
    /// compiled against it, and it must stay valid while compiled code that
    /// calls it is alive.
    pub unsafe fn register_symbol(
        &self,
        name: impl Into<String>,
        addr: usize,
    ) -> Result<(), RegistryError> {
        self.insert_symbol(name.into(), HostSymbol { addr, signature: None })
    }

    /// Makes `f` callable as `extern @name`. Declarations whose signature
    /// differs from `F`'s are refused at compile time.
    pub fn register_symbol_fn<F: JitFn>(
        &self,
        name: impl Into<String>,
        f: F,
    ) -> Result<(), RegistryError> {
        self.insert_symbol(
            name.into(),
            HostSymbol {
                addr: f.addr(),
                signature: Some(F::signature()),
            },
        )
    }

    fn insert_symbol(&self, name: String, symbol: HostSymbol) -> Result<(), RegistryError> {
        let mut symbols = self.symbols.write();
        if symbols.contains_key(&name) {
            return Err(RegistryError::DuplicateSymbol(name));
        }
        symbols.insert(name, symbol);
        Ok(())
    }

    pub fn lookup(&self, id: FunctionId) -> Result<RegisteredFunction> {
        self.functions
            .read()
            .get(&id)
            .cloned()
            .ok_or(Error::UnregisteredFunction { id })
    }

    pub fn contains(&self, id: FunctionId) -> bool {
        self.functions.read().contains_key(&id)
    }

    pub fn symbol(&self, name: &str) -> Option<usize> {
        self.symbols.read().get(name).map(|symbol| symbol.addr)
    }

    /// The address of host symbol `name`, provided it can be called with
    /// `signature`.
    pub(crate) fn resolve_symbol(&self, name: &str, signature: &Signature) -> Result<usize> {
        let symbols = self.symbols.read();
        let Some(symbol) = symbols.get(name) else {
            return Err(Error::Codegen(format!(
                "extern `{name}` has no registered host symbol"
            )));
        };
        match &symbol.signature {
            Some(host) if host != signature => Err(Error::Codegen(format!(
                "extern `{name}` is declared as {signature} but the host symbol has {host}"
            ))),
            _ => Ok(symbol.addr),
        }
    }

    pub fn len(&self) -> usize {
        self.functions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rejit_ir::parse_module;

    const ID: &str = "module \"id\"\nfn @id(i64) -> i64 export {\nbb0(%0: i64):\n  return %0\n}\n";

    #[test]
    fn lookup_returns_the_registered_module() {
        let registry = Registry::new();
        let id = FunctionId::from_addr(0x1000);
        unsafe { registry.register(id, "id", parse_module(ID).expect("parse")) }
            .expect("register");
        let a = registry.lookup(id).expect("lookup");
        let b = registry.lookup(id).expect("lookup again");
        assert!(Arc::ptr_eq(&a.module, &b.module));
        assert_eq!(a.entry, "id");
    }

    #[test]
    fn unknown_id_is_unregistered() {
        let registry = Registry::new();
        let err = registry.lookup(FunctionId::from_addr(0x2000)).unwrap_err();
        assert!(matches!(err, Error::UnregisteredFunction { .. }));
    }

    #[test]
    fn duplicate_and_missing_entry_are_rejected() {
        let registry = Registry::new();
        let id = FunctionId::from_addr(0x3000);
        let module = parse_module(ID).expect("parse");
        unsafe {
            registry.register(id, "id", module.clone()).expect("first");
            assert!(matches!(
                registry.register(id, "id", module.clone()),
                Err(RegistryError::Duplicate(_))
            ));
            assert!(matches!(
                registry.register(FunctionId::from_addr(0x3001), "nope", module),
                Err(RegistryError::MissingEntry { .. })
            ));
        }
    }

    #[test]
    fn native_signature_must_match_entry() {
        extern "C" fn wrong(x: i32) -> i32 {
            x
        }
        let registry = Registry::new();
        let err = unsafe {
            registry.register_fn(
                wrong as extern "C" fn(i32) -> i32,
                "id",
                parse_module(ID).expect("parse"),
            )
        }
        .unwrap_err();
        assert!(matches!(err, RegistryError::SignatureMismatch { .. }));
    }

    #[test]
    fn modules_with_undominated_uses_are_rejected() {
        let source = "module \"m\"\nfn @f(bool, i64) -> i64 export {\nbb0(%0: bool, %1: i64):\n  br %0, bb1, bb2\nbb1:\n  %3 = add i64 %2, %1\n  jump bb3(%3)\nbb2:\n  %2 = add i64 %1, %1\n  jump bb3(%2)\nbb3(%4: i64):\n  return %4\n}\n";
        let registry = Registry::new();
        let err = unsafe {
            registry.register(
                FunctionId::from_addr(0x4000),
                "f",
                parse_module(source).expect("parse"),
            )
        }
        .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidModule(_)), "{err}");
        assert!(registry.is_empty());
    }

    #[test]
    fn typed_host_symbols_check_declared_signatures() {
        extern "C" fn twice(x: f64) -> f64 {
            x * 2.0
        }
        let registry = Registry::new();
        registry
            .register_symbol_fn("twice", twice as extern "C" fn(f64) -> f64)
            .expect("symbol");
        let good = Signature::new(vec![rejit_ir::Type::F64], Some(rejit_ir::Type::F64));
        let bad = Signature::new(vec![rejit_ir::Type::I64], Some(rejit_ir::Type::F64));
        assert_eq!(registry.resolve_symbol("twice", &good).ok(), registry.symbol("twice"));
        assert!(matches!(registry.resolve_symbol("twice", &bad), Err(Error::Codegen(_))));
        assert!(matches!(registry.resolve_symbol("other", &good), Err(Error::Codegen(_))));
    }
}
