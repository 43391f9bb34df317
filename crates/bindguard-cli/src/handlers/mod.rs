//! Command handlers.
//!
//! Each handler is a thin wrapper: build the runtime object, call it, and
//! format the result for the terminal.

pub mod detect;
pub mod verify;
