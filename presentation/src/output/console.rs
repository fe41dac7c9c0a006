//! Console output for eye

use colored::Colorize;
use std::path::Path;

/// Reference card printed by `help` / `?` in the REPL.
pub const API_HELP: &str = r#"
ALGO.bridge API:
  getState()              → {windows, apps, user, activeWindow}
  openApp(name)           → opens app by name
  closeWindow(id)         → closes window
  focusWindow(id)         → brings window to front
  query(selector)         → querySelector result
  queryAll(selector)      → querySelectorAll results
  click(selector)         → clicks element
  setValue(sel, value)    → sets input value
  eval(code)              → evaluate JS (same as direct expression)

Useful globals:
  windows                 → array of window data objects
  systemApps              → array of {name, icon, file, ...}
  document.title          → page title
  localStorage            → persistent storage

Examples:
  a:ALGO.bridge.getState()
  b:systemApps.map(a=>a.name).join(", ")
  c:ALGO.bridge.openApp("shell")
  d:[...document.querySelectorAll(".window-title")].map(t=>t.textContent)
"#;

/// Formats eye output for the terminal
pub struct ConsoleFormatter;

impl ConsoleFormatter {
    /// REPL greeting.
    pub fn banner(via_daemon: bool) -> String {
        let title = if via_daemon {
            "eye bridge connected via daemon (Ctrl+D to exit)"
        } else {
            "eye bridge connected (Ctrl+D to exit)"
        };
        format!(
            "{}\n  expression      -> fire & forget\n  id:expression   -> get response\n  help            -> show API reference\n",
            title.bold()
        )
    }

    /// A frame the REPL did not ask for, or a reply it did.
    pub fn inbound(frame: &str) -> String {
        format!("{} {}", "<".dimmed(), frame)
    }

    pub fn error(message: &str) -> String {
        format!("{} {}", "Error:".red().bold(), message)
    }

    pub fn missing_token() -> String {
        [
            "No token found.".to_string(),
            "  Set EYE_TOKEN env var, or".to_string(),
            "  Create ~/.algo/config.json with {\"token\":\"...\",\"server\":\"...\"}, or"
                .to_string(),
            "  Create ~/.algo/token".to_string(),
        ]
        .join("\n")
    }

    pub fn status_not_running(socket: &Path, stale: bool) -> String {
        let mut out = format!("Daemon: {}", "not running".yellow());
        if stale {
            out.push_str(&format!("\nSocket: {} (stale)", socket.display()));
        }
        out
    }

    pub fn status_running(note: &str, socket: &Path) -> String {
        format!(
            "Daemon: {} ({})\nSocket: {}",
            "running".green(),
            note,
            socket.display()
        )
    }

    pub fn kill_not_running(removed_stale: bool) -> String {
        if removed_stale {
            "Daemon not running\nRemoved stale socket".to_string()
        } else {
            "Daemon not running".to_string()
        }
    }

    pub fn killed() -> String {
        "Daemon killed".to_string()
    }
}
