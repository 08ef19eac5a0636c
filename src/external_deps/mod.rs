//! Integrations that rely on external runtimes.
//!
//! JavaScript interpreters live here: the Deno subprocess backends, the
//! embedded Boa engine and the dispatcher choosing between them.

pub mod interpreters;

pub use interpreters::{InterpreterDispatcher, JavascriptInterpreter};
