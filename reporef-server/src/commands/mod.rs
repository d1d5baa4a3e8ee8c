//! CLI command implementations

pub mod resolve;
pub mod serve;

pub use resolve::ResolveArgs;
pub use serve::ServeArgs;
