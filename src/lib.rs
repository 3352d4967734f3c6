pub mod app;
pub mod cli;
pub mod langserver;
pub mod lsp;
pub mod server;
pub mod telemetry;
