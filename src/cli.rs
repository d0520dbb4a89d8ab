//! CLI domain: parse, route and output only.
//! Generation itself lives in the coordinator; route handlers stay thin.

mod output;
mod parse;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands};
pub use route::RunContext;
