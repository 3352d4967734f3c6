use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// One session over stdin/stdout.
    Stdio,
    /// Content-Length framed sessions over TCP.
    Tcp,
    /// One JSON message per WebSocket text frame.
    Websocket,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub addr: SocketAddr,
    pub trace: bool,
    pub logfile: Option<PathBuf>,
    pub log_filter: String,
}

#[derive(Parser, Debug)]
#[command(name = "lsp_session", version)]
#[command(about = "Language server session layer over stdio, TCP or WebSocket", long_about = None)]
pub struct Cli {
    #[arg(long, value_enum, default_value_t = Mode::Stdio)]
    pub mode: Mode,
    /// Listen address for tcp and websocket modes.
    #[arg(long, default_value = "127.0.0.1:4389")]
    pub addr: SocketAddr,
    /// Log every inbound and outbound message.
    #[arg(long)]
    pub trace: bool,
    /// Mirror logs into this file.
    #[arg(long)]
    pub logfile: Option<PathBuf>,
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}

impl Cli {
    pub fn from_args() -> Self {
        Self::parse()
    }

    pub fn into_config(self) -> Config {
        Config {
            mode: self.mode,
            addr: self.addr,
            trace: self.trace,
            logfile: self.logfile,
            log_filter: self.log_filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Cli::try_parse_from(["lsp_session"]).unwrap().into_config();
        assert_eq!(config.mode, Mode::Stdio);
        assert_eq!(config.addr, "127.0.0.1:4389".parse().unwrap());
        assert!(!config.trace);
        assert!(config.logfile.is_none());
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_network_mode() {
        let config = Cli::try_parse_from([
            "lsp_session",
            "--mode",
            "websocket",
            "--addr",
            "0.0.0.0:9000",
            "--trace",
            "--logfile",
            "/tmp/lsp.log",
        ])
        .unwrap()
        .into_config();
        assert_eq!(config.mode, Mode::Websocket);
        assert_eq!(config.addr.port(), 9000);
        assert!(config.trace);
        assert_eq!(config.logfile, Some(PathBuf::from("/tmp/lsp.log")));
    }

    #[test]
    fn test_rejects_unknown_mode_and_bad_addr() {
        assert!(Cli::try_parse_from(["lsp_session", "--mode", "pipe"]).is_err());
        assert!(Cli::try_parse_from(["lsp_session", "--addr", "localhost"]).is_err());
    }
}
