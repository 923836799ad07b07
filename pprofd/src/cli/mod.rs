//! Command-line interface of the `pprofd` binary

mod args;

pub use args::Args;
