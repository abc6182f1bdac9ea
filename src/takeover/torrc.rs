//! Typed edits to the tor configuration file.
//!
//! Every hidden service this program manages is fenced by marker comments
//! naming the onion address, so takeovers and releases only ever touch
//! their own block. Lines outside a managed block are preserved byte for
//! byte.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::types::{CellarError, Result};
use crate::util::write_atomic;

const BEGIN_MARKER: &str = "# BEGIN cellar ";
const END_MARKER: &str = "# END cellar ";

#[derive(Debug, Clone, PartialEq)]
enum Line {
    /// A line we do not own, kept verbatim (without its newline).
    Plain(String),
    /// A managed hidden-service block for one onion address.
    Block { address: String, body: Vec<String> },
}

/// A parsed torrc, edited as a list of lines and managed blocks.
#[derive(Debug)]
pub struct TorrcDocument {
    path: PathBuf,
    lines: Vec<Line>,
}

impl TorrcDocument {
    /// Parse the file at `path`. A missing file parses as empty, so a
    /// first takeover can create the torrc.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let lines = Self::parse(&text)?;
        Ok(Self { path, lines })
    }

    fn parse(text: &str) -> Result<Vec<Line>> {
        let mut lines = Vec::new();
        let mut block: Option<(String, Vec<String>)> = None;

        for raw in text.lines() {
            if let Some(addr) = raw.trim().strip_prefix(BEGIN_MARKER) {
                if block.is_some() {
                    return Err(CellarError::Internal(
                        "nested managed block in torrc".into(),
                    ));
                }
                block = Some((addr.trim().to_string(), Vec::new()));
            } else if let Some(addr) = raw.trim().strip_prefix(END_MARKER) {
                match block.take() {
                    Some((address, body)) if address == addr.trim() => {
                        lines.push(Line::Block { address, body });
                    }
                    _ => {
                        return Err(CellarError::Internal(format!(
                            "unmatched managed block end for {} in torrc",
                            addr.trim()
                        )))
                    }
                }
            } else if let Some((_, body)) = block.as_mut() {
                body.push(raw.to_string());
            } else {
                lines.push(Line::Plain(raw.to_string()));
            }
        }

        if let Some((address, _)) = block {
            return Err(CellarError::Internal(format!(
                "unterminated managed block for {address} in torrc"
            )));
        }
        Ok(lines)
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Plain(text) => {
                    out.push_str(text);
                    out.push('\n');
                }
                Line::Block { address, body } => {
                    out.push_str(BEGIN_MARKER);
                    out.push_str(address);
                    out.push('\n');
                    for b in body {
                        out.push_str(b);
                        out.push('\n');
                    }
                    out.push_str(END_MARKER);
                    out.push_str(address);
                    out.push('\n');
                }
            }
        }
        out
    }

    pub fn has_block(&self, address: &str) -> bool {
        self.lines
            .iter()
            .any(|l| matches!(l, Line::Block { address: a, .. } if a == address))
    }

    /// Append a managed hidden-service block for `address`.
    pub fn insert_block(&mut self, address: &str, service_dir: &Path, redirect_port: u16) {
        self.lines.push(Line::Block {
            address: address.to_string(),
            body: vec![
                format!("HiddenServiceDir {}", service_dir.display()),
                format!("HiddenServicePort 80 127.0.0.1:{redirect_port}"),
            ],
        });
        debug!(address, "torrc block inserted");
    }

    /// Remove the managed block for `address`. Returns whether one existed.
    pub fn remove_block(&mut self, address: &str) -> bool {
        let before = self.lines.len();
        self.lines
            .retain(|l| !matches!(l, Line::Block { address: a, .. } if a == address));
        let removed = self.lines.len() != before;
        if removed {
            debug!(address, "torrc block removed");
        }
        removed
    }

    /// Write the document back atomically.
    pub fn save(&self) -> Result<()> {
        write_atomic(&self.path, self.render().as_bytes())?;
        Ok(())
    }
}
