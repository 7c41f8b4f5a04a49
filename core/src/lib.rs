//! codex-switch Core Library
//!
//! Encrypted multi-account credential switching for the codex CLI. This
//! library owns the vault, the persistent store, the switch engine, the
//! quota prober, and the application context that ties them together. The
//! `codex-switch-cli` binary is a thin consumer of this crate; a future GUI
//! shell would be another.

pub mod core;

pub use crate::core::{AppContext, CoreError, CoreResult};
