//! # pprofd - Embedded Profiling Server
//!
//! pprofd exposes a running process's execution profile over an HTTP
//! interface of its own, separate from any application web server: CPU
//! profiles, execution traces, a program counter → function name lookup, the
//! command line and a set of named `/proc` profiles.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        HTTP client                              │
//! │              (browser, curl, `go tool pprof`)                   │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ /profile /trace /symbol /<name>
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Debug Server (axum)                           │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │ Timed Capture│──▶│   Sampler    │──▶│ pprof-rs /   │         │
//! │  │  Controller  │   │   Gateway    │   │ log tracer   │         │
//! │  └──────┬───────┘   └──────────────┘   └──────────────┘         │
//! │         │ raw capture                                           │
//! │         ▼                                                       │
//! │  ┌──────────────┐  POST /symbol   ┌──────────────┐              │
//! │  │   Profile    │────────────────▶│ Live Symbol  │              │
//! │  │   Pipeline   │◀────────────────│    Table     │              │
//! │  └──────────────┘                 └──────────────┘              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`sampler`]: single-slot gateway over the process-wide samplers
//!   - `cpu`: `pprof`-based CPU sampling, gzipped pprof protobuf output
//!   - `trace`: `log` record recorder, Chrome Trace Event output
//! - [`capture`]: bounded-duration capture, ended early on client disconnect
//! - [`pipeline`]: parse → symbolize (over HTTP, against `/symbol`) → text report
//! - [`symbolization`]: ELF function table of `/proc/self/exe`, relocated for PIE
//! - [`profiles`]: named profiles (`heap`, `maps`, `threads`)
//! - [`server`]: router, handlers, index page, builder and listener lifecycle
//! - [`cli`]: arguments of the `pprofd` binary
//! - [`domain`]: request types and error enums
//!
//! ## Typical Usage
//!
//! ```no_run
//! use pprofd::server::DebugServer;
//!
//! # async fn example() {
//! DebugServer::builder()
//!     .addr("127.0.0.1:6060")
//!     .error_handler(|e| eprintln!("debug server: {e}"))
//!     .build()
//!     .run();
//! # }
//! ```
//!
//! ```bash
//! curl 'http://127.0.0.1:6060/profile?seconds=5'            # text report
//! curl -o cpu.pb.gz 'http://127.0.0.1:6060/profile?binary=1' # raw capture
//! curl 'http://127.0.0.1:6060/symbol?0x55f3a2b4c780'
//! ```
//!
//! ## Key Concepts
//!
//! - **Single slot**: the CPU sampler is process-wide, so a second concurrent
//!   `/profile` fails immediately instead of waiting
//! - **Self-symbolization**: the text report resolves addresses by calling
//!   this process's own `/symbol` endpoint, like external tools do
//! - **PIE/ASLR**: runtime addresses are relocated by the load bias before
//!   the symbol table lookup

pub mod capture;
pub mod cli;
pub mod domain;
pub mod pipeline;
pub mod profiles;
pub mod sampler;
pub mod server;
pub mod symbolization;
