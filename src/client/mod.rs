//! Browser-side half of the generation protocol. Nothing in here depends on
//! the server stack so it can be built for wasm.

pub mod history;
pub mod reassembler;

pub use history::*;
pub use reassembler::*;
