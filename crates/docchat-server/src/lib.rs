//! docchat front-ends: the HTTP/SSE API and the terminal REPL.

pub mod repl;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
