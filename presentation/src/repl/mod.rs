//! Interactive REPL
//!
//! Line editing runs on its own thread (reedline blocks); lines reach the
//! async side over a channel and are handed to a [`ReplBackend`]. Frames
//! from the connection arrive on a second channel and are printed as they
//! come.

mod direct;
mod prompt;

pub use direct::DirectBackend;

use crate::output::console::{API_HELP, ConsoleFormatter};
use async_trait::async_trait;
use prompt::EyePrompt;
use reedline::{FileBackedHistory, Reedline, Signal};
use std::io::Write;
use tokio::sync::mpsc;

const HISTORY_SIZE: usize = 1000;

/// Where REPL input goes.
#[async_trait]
pub trait ReplBackend: Send {
    async fn submit(&mut self, line: &str) -> Result<(), String>;
}

/// What one line of input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplInput {
    Skip,
    Help,
    Submit(String),
}

impl ReplInput {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => ReplInput::Skip,
            "help" | "?" => ReplInput::Help,
            _ => ReplInput::Submit(line.to_string()),
        }
    }
}

/// Interactive evaluator REPL
pub struct EvalRepl {
    via_daemon: bool,
}

impl EvalRepl {
    pub fn new(via_daemon: bool) -> Self {
        Self { via_daemon }
    }

    /// Run until Ctrl+D or until `inbound` closes.
    pub async fn run(
        &self,
        backend: &mut dyn ReplBackend,
        inbound: mpsc::UnboundedReceiver<String>,
    ) -> std::io::Result<()> {
        println!("{}", ConsoleFormatter::banner(self.via_daemon));

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        // Not joined: the editor thread stays blocked in read_line until
        // the process exits.
        std::thread::spawn(move || read_lines(line_tx));

        drive(backend, line_rx, inbound, &mut std::io::stdout()).await
    }
}

fn read_lines(lines: mpsc::UnboundedSender<String>) {
    let mut editor = Reedline::create();
    if let Some(path) = history_path()
        && let Ok(history) = FileBackedHistory::with_file(HISTORY_SIZE, path)
    {
        editor = editor.with_history(Box::new(history));
    }
    let prompt = EyePrompt;

    loop {
        match editor.read_line(&prompt) {
            Ok(Signal::Success(line)) => {
                if lines.send(line).is_err() {
                    break;
                }
            }
            Ok(Signal::CtrlD) | Err(_) => break,
            Ok(_) => continue,
        }
    }
}

fn history_path() -> Option<std::path::PathBuf> {
    let dir = dirs::data_dir()?.join("eye");
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir.join("history.txt"))
}

/// The REPL event loop, separated from the terminal for testing.
pub async fn drive<W: Write>(
    backend: &mut dyn ReplBackend,
    mut lines: mpsc::UnboundedReceiver<String>,
    mut inbound: mpsc::UnboundedReceiver<String>,
    out: &mut W,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    writeln!(out)?;
                    return Ok(());
                };
                match ReplInput::parse(&line) {
                    ReplInput::Skip => {}
                    ReplInput::Help => writeln!(out, "{API_HELP}")?,
                    ReplInput::Submit(frame) => {
                        if let Err(e) = backend.submit(&frame).await {
                            writeln!(out, "{}", ConsoleFormatter::error(&e))?;
                        }
                    }
                }
            }
            frame = inbound.recv() => {
                let Some(frame) = frame else {
                    writeln!(out, "{}", ConsoleFormatter::error("connection closed"))?;
                    return Ok(());
                };
                writeln!(out, "{}", ConsoleFormatter::inbound(&frame))?;
            }
        }
        out.flush()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        sent: Vec<String>,
        fail: bool,
    }

    #[async_trait]
    impl ReplBackend for Recorder {
        async fn submit(&mut self, line: &str) -> Result<(), String> {
            if self.fail {
                return Err("not connected".to_string());
            }
            self.sent.push(line.to_string());
            Ok(())
        }
    }

    #[test]
    fn parse_input() {
        assert_eq!(ReplInput::parse("   "), ReplInput::Skip);
        assert_eq!(ReplInput::parse("help"), ReplInput::Help);
        assert_eq!(ReplInput::parse("?"), ReplInput::Help);
        assert_eq!(
            ReplInput::parse("a:document.title"),
            ReplInput::Submit("a:document.title".to_string())
        );
    }

    #[tokio::test]
    async fn lines_are_submitted_and_frames_printed() {
        colored::control::set_override(false);
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let mut backend = Recorder::default();
        let mut out = Vec::new();

        line_tx.send("a:1+1".to_string()).unwrap();
        line_tx.send(String::new()).unwrap();
        line_tx.send("help".to_string()).unwrap();
        drop(line_tx);
        let _frame_tx = frame_tx;

        drive(&mut backend, line_rx, frame_rx, &mut out).await.unwrap();

        assert_eq!(backend.sent, vec!["a:1+1".to_string()]);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("ALGO.bridge API"));
    }

    #[tokio::test]
    async fn closed_connection_ends_the_loop() {
        colored::control::set_override(false);
        let (_line_tx, line_rx) = mpsc::unbounded_channel::<String>();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        frame_tx.send("z:hello".to_string()).unwrap();
        drop(frame_tx);

        let mut backend = Recorder::default();
        let mut out = Vec::new();
        drive(&mut backend, line_rx, frame_rx, &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("< z:hello"));
        assert!(text.ends_with("Error: connection closed\n"));
    }

    #[tokio::test]
    async fn backend_errors_are_reported() {
        colored::control::set_override(false);
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (_frame_tx, frame_rx) = mpsc::unbounded_channel::<String>();
        line_tx.send("x:1".to_string()).unwrap();
        drop(line_tx);

        let mut backend = Recorder {
            fail: true,
            ..Default::default()
        };
        let mut out = Vec::new();
        drive(&mut backend, line_rx, frame_rx, &mut out).await.unwrap();
        assert!(String::from_utf8(out).unwrap().contains("Error: not connected"));
    }
}
