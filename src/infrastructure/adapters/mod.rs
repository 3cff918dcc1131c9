//! Bot adapters - connections to chat platforms

pub mod console;

pub use console::ConsoleAdapter;
