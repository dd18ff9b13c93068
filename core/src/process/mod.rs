//! Process primitives for the brood supervisor
//!
//! This module wraps the operating-system calls the supervisor is built on:
//! creating a copy of the calling process, waiting for a child to change
//! state, decoding raw wait statuses and signalling children.
//!
//! ## Platform Support
//!
//! - **Unix**: `fork(2)`, `waitpid(2)`, `kill(2)` via `nix` and `libc`
//!
//! Only Unix is supported; the supervision protocol depends on `SIGCHLD`.

#[cfg(unix)]
pub mod unix;

#[cfg(unix)]
pub use unix::*;
