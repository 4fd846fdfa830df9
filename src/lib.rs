pub mod config;
pub mod core;
pub mod error;
pub mod fusion;
pub mod ir_graph;
pub mod json_graph;
pub mod lowering;
pub mod manifest;
pub mod metadata;
pub mod pipeline;
pub mod report;
pub mod serializer;
