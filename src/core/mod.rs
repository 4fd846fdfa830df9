pub mod attr;
pub mod op;
pub mod types;
