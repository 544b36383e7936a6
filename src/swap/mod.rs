//! Hot swapping: the controller state machine and the isolation boundary.
//!
//! ```text
//! DirChange channel → HotSwap → Compiler → CompiledUnit
//!                        │
//!                        └── unload old context, load new, invoke entry
//! ```

// Controller actor: serialize rebuilds, coalesce queued signals.
mod controller;
// Isolated execution contexts over dynamic libraries.
mod isolate;

#[cfg(test)]
mod tests;

pub use controller::HotSwap;
pub use isolate::{ENTRY_SYMBOL, IsolatedContext, Isolator, LibIsolator, SwapError};
