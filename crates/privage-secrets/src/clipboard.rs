//! System clipboard access
//!
//! There is no portable clipboard API, so [`SystemClipboard`] pipes the text
//! into the first clipboard tool found on `PATH`.

use privage_core::{PrivageError, PrivageResult};
use std::io::Write;
use std::process::{Command, Stdio};

/// Destination for `privage clipboard`.
pub trait Clipboard {
    fn copy(&mut self, text: &str) -> PrivageResult<()>;
}

/// Candidate tools, tried in order.
const TOOLS: &[(&str, &[&str])] = &[
    ("pbcopy", &[]),
    ("wl-copy", &[]),
    ("xclip", &["-selection", "clipboard"]),
    ("xsel", &["--clipboard", "--input"]),
];

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn copy(&mut self, text: &str) -> PrivageResult<()> {
        for (tool, args) in TOOLS {
            let mut child = match Command::new(tool)
                .args(*args)
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
            {
                Ok(child) => child,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(text.as_bytes())?;
            }
            let status = child.wait()?;
            if !status.success() {
                return Err(PrivageError::Other(anyhow::anyhow!(
                    "{tool} exited with {status}"
                )));
            }
            tracing::debug!(tool, "copied to clipboard");
            return Ok(());
        }
        Err(PrivageError::Other(anyhow::anyhow!(
            "no clipboard tool found (tried pbcopy, wl-copy, xclip, xsel)"
        )))
    }
}

/// In-memory clipboard for tests and headless callers.
#[derive(Debug, Default, Clone)]
pub struct MemoryClipboard {
    pub contents: Option<String>,
}

impl Clipboard for MemoryClipboard {
    fn copy(&mut self, text: &str) -> PrivageResult<()> {
        self.contents = Some(text.to_string());
        Ok(())
    }
}
