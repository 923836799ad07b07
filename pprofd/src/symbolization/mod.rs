//! # Symbol Resolution and Address Translation
//!
//! Converts raw program counters captured by the CPU sampler into function
//! names. This backs the `/symbol` endpoint, which in turn backs the text
//! report pipeline and external `pprof` tooling.
//!
//! ## The Live Function Table
//!
//! The executable's ELF symbol table lists every function with its link-time
//! address and size. A program counter belongs to a function when it falls in
//! `[address, address + size)`.
//!
//! ### PIE (Position Independent Executable)
//!
//! PIE binaries are loaded at a randomized base (ASLR), so runtime addresses
//! differ from link-time addresses by a constant load bias:
//!
//! ```text
//! Runtime Address = Load Bias + Link-time Address
//! ```
//!
//! The bias is read from `/proc/self/maps` (see [`memory_maps`]). Non-PIE
//! executables have a zero bias.
//!
//! ## Lookup Flow
//!
//! ```text
//! 1. /symbol receives 0x55f3a2b4c780
//! 2. subtract load bias 0x55f3a2b00000   → 0x4c780
//! 3. binary search the sorted table       → _ZN5myapp6worker4spin17h...E @ 0x4c700 (+0x100)
//! 4. demangle                             → myapp::worker::spin
//! ```
//!
//! ## Limitations
//!
//! - **Requires a symbol table**: fully stripped binaries yield an empty table
//!   and `/symbol` answers `num_symbols: 0`
//! - **Main executable only**: shared library addresses stay unresolved

pub mod memory_maps;
pub mod symbol_table;

pub use memory_maps::{parse_memory_maps, read_memory_maps, ExecutableMapping, MemoryRange};
pub use symbol_table::{
    current_load_bias, demangle_symbol, FunctionSymbol, LiveSymbolTable, SymbolLookup,
};
