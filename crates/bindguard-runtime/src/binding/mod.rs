//! Native binding adapters.

mod library;

pub use library::{LibraryBinding, LibraryLoader, REQUIRED_SYMBOLS};
