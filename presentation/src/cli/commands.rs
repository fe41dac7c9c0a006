//! CLI command definitions

use clap::Parser;
use std::path::PathBuf;

/// CLI arguments for eye
#[derive(Parser, Debug)]
#[command(name = "eye")]
#[command(author, version, about = "Fast browser JS VM bridge")]
#[command(long_about = r#"
eye evaluates JavaScript in a browser tab connected to the relay.

Prefix an expression with an id (`a:document.title`) to wait for its
result; without a prefix it is fire and forget. With no expression, eye
starts an interactive REPL.

Configuration is loaded from (in priority order):
1. EYE_TOKEN / EYE_SERVER environment variables
2. ~/.algo/config.json    {"token":"...","server":"wss://..."}
3. ~/.algo/token          Plain token file
4. ~/.algo/server         Plain server URL

A background daemon keeps the connection open between calls. It starts on
the first call, exits after 5 minutes idle or when the browser disconnects,
and is replaced automatically when eye is rebuilt.

Example:
  eye 'console.log("hi")'
  eye 'a:document.title'
  eye 'a:ALGO.bridge.getState()'
  eye --status
"#)]
pub struct Cli {
    /// Expression to evaluate; multiple words are joined with spaces
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub expression: Vec<String>,

    /// Run as the background daemon (started automatically)
    #[arg(long, hide = true)]
    pub daemon: bool,

    /// Report whether the daemon is running
    #[arg(long, conflicts_with_all = ["kill", "mcp", "daemon"])]
    pub status: bool,

    /// Stop the daemon
    #[arg(long, conflicts_with_all = ["mcp", "daemon"])]
    pub kill: bool,

    /// Serve the MCP tool bridge on stdin/stdout
    #[arg(long, conflicts_with = "daemon")]
    pub mcp: bool,

    /// Connect to the relay directly instead of through the daemon
    #[arg(long)]
    pub direct: bool,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// The expression words joined back together, if any were given.
    pub fn expression(&self) -> Option<String> {
        if self.expression.is_empty() {
            None
        } else {
            Some(self.expression.join(" "))
        }
    }
}

/// CLI arguments for eye-relay
#[derive(Parser, Debug)]
#[command(name = "eye-relay")]
#[command(author, version, about = "Relay between eye clients and the browser bridge")]
#[command(long_about = r#"
eye-relay pairs eye clients (/api/eye) with the browser tab that evaluates
their expressions (/api/eye-bridge) and serves structured tool calls on
POST /api/mcp.

Configuration is loaded from (in priority order):
1. EYE_RELAY_* environment variables (e.g. EYE_RELAY_BIND)
2. --config <path>     Explicit config file
3. ./eye-relay.toml    Working-directory config

Example eye-relay.toml:
  bind = "0.0.0.0:8080"
  [tokens]
  "secret-token" = "alice"
"#)]
pub struct RelayCli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Address to listen on (overrides the config file)
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Verbosity level (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
