//! Library wrapper around the `reclaim` CLI implementation.
//!
//! The CLI is exercised through its binaries and integration tests, but
//! `cargo test -p reclaim-cli --lib` is a quick way to typecheck it without
//! building the binary test suite. `main.rs` is compiled here as a module for
//! that purpose; its `fn main()` is just another function in this context.

#[allow(dead_code)]
#[path = "main.rs"]
mod main_bin;
