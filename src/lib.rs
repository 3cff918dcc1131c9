//! plugbot - plugin-hosting chat bot runtime

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod plugins;
