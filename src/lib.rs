pub mod analyzers;
pub mod config;
pub mod diagnostics;
pub mod entity;
pub mod loader;
pub mod output;
pub mod pipeline;
