//! Live function table of the running executable
//!
//! Loads the ELF function symbols of `/proc/self/exe` once and answers
//! program counter lookups by binary search. See the module-level docs of
//! [`crate::symbolization`] for the PIE relocation.

use anyhow::{Context as _, Result};
use log::{info, warn};
use object::{Object, ObjectKind, ObjectSegment, ObjectSymbol, SymbolKind};
use rustc_demangle::demangle;
use std::fs;

use super::memory_maps::ExecutableMapping;

/// Program counter → function name lookups against the running process
///
/// Implemented by [`LiveSymbolTable`]; tests substitute fixed tables.
pub trait SymbolLookup: Send + Sync {
    /// True when no symbol information is available at all
    fn is_empty(&self) -> bool;

    /// Name of the function whose code contains `pc`, if any
    fn lookup(&self, pc: u64) -> Option<String>;
}

/// One function symbol as it appears in the ELF symbol table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSymbol {
    /// Link-time address (before relocation)
    pub address: u64,
    pub size: u64,
    /// Raw (possibly mangled) symbol name
    pub name: String,
}

/// Function table of the running executable
///
/// Built from the `.symtab`/`.dynsym` function symbols of `/proc/self/exe`,
/// sorted by address. Position-independent executables are relocated by the
/// load bias taken from `/proc/self/maps`. Names are demangled on every
/// lookup; nothing is cached.
#[derive(Debug, Clone, Default)]
pub struct LiveSymbolTable {
    functions: Vec<FunctionSymbol>,
    load_bias: u64,
}

impl LiveSymbolTable {
    /// Load the symbol table of the current executable
    ///
    /// # Errors
    /// Returns an error if the executable cannot be read or parsed
    pub fn load_current() -> Result<Self> {
        let (exe, data) = read_current_exe()?;
        let obj = object::File::parse(&*data).context("Failed to parse object file")?;
        let load_bias = load_bias(&obj);

        let table = Self::from_functions(function_symbols(&obj), load_bias);
        info!(
            "Loaded {} function symbols from {} (load bias 0x{:x})",
            table.len(),
            exe.display(),
            load_bias
        );
        Ok(table)
    }

    /// Build a table from arbitrary function symbols
    #[must_use]
    pub fn from_functions(functions: impl IntoIterator<Item = FunctionSymbol>, load_bias: u64) -> Self {
        let mut functions: Vec<FunctionSymbol> =
            functions.into_iter().filter(|f| f.address != 0 && !f.name.is_empty()).collect();

        // Aliases share an address; prefer the one that carries a size
        functions.sort_by(|a, b| a.address.cmp(&b.address).then(b.size.cmp(&a.size)));
        functions.dedup_by_key(|f| f.address);

        Self { functions, load_bias }
    }

    /// A table with no symbols (stripped binary, unreadable executable)
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of function symbols
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Runtime address minus link-time address
    #[must_use]
    pub fn load_bias(&self) -> u64 {
        self.load_bias
    }

    fn find(&self, pc: u64) -> Option<&FunctionSymbol> {
        let addr = pc.checked_sub(self.load_bias)?;
        let idx = self.functions.partition_point(|f| f.address <= addr).checked_sub(1)?;
        let function = &self.functions[idx];

        let contains = if function.size == 0 {
            function.address == addr
        } else {
            addr - function.address < function.size
        };
        contains.then_some(function)
    }
}

impl SymbolLookup for LiveSymbolTable {
    fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    fn lookup(&self, pc: u64) -> Option<String> {
        self.find(pc).map(|f| demangle_symbol(&f.name))
    }
}

/// Load bias of the running executable
///
/// Zero for non-PIE executables, or when the executable is not found in
/// `/proc/self/maps`.
///
/// # Errors
/// Returns an error if the executable cannot be read or parsed
pub fn current_load_bias() -> Result<u64> {
    let (_, data) = read_current_exe()?;
    let obj = object::File::parse(&*data).context("Failed to parse object file")?;
    Ok(load_bias(&obj))
}

fn read_current_exe() -> Result<(std::path::PathBuf, Vec<u8>)> {
    let exe = std::env::current_exe().context("Failed to resolve current executable")?;
    let data = fs::read(&exe).with_context(|| format!("Failed to read {}", exe.display()))?;
    Ok((exe, data))
}

fn load_bias(obj: &object::File<'_>) -> u64 {
    if obj.kind() != ObjectKind::Dynamic {
        return 0;
    }

    let first_segment = obj.segments().map(|s| s.address()).min().unwrap_or(0);
    match ExecutableMapping::current() {
        Ok(mapping) => mapping.range.start.saturating_sub(first_segment & !0xfff),
        Err(e) => {
            warn!("Failed to get memory range: {e}. Symbol lookups may not resolve.");
            0
        }
    }
}

/// Demangle a Rust symbol name (other names pass through unchanged)
#[must_use]
pub fn demangle_symbol(symbol: &str) -> String {
    format!("{:#}", demangle(symbol))
}

fn function_symbols(obj: &object::File<'_>) -> Vec<FunctionSymbol> {
    obj.symbols()
        .chain(obj.dynamic_symbols())
        .filter(|s| s.kind() == SymbolKind::Text && s.is_definition())
        .filter_map(|s| {
            let name = s.name().ok()?;
            Some(FunctionSymbol { address: s.address(), size: s.size(), name: name.to_string() })
        })
        .collect()
}
