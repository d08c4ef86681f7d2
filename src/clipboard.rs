//! Clipboard writes, modeled as a capability.
//!
//! Copying a secret to the clipboard necessarily converts it to an
//! immutable `String` the OS owns a copy of; that is the one documented
//! leakable copy in the system.

use tracing::debug;

/// Capability trait over the system clipboard.
pub trait ClipboardWriter: Send {
    fn available(&self) -> bool;
    fn copy_text(&mut self, text: &str) -> Result<(), String>;
}

/// `arboard`-backed clipboard.
pub struct SystemClipboard {
    inner: Option<arboard::Clipboard>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        let inner = match arboard::Clipboard::new() {
            Ok(c) => Some(c),
            Err(err) => {
                debug!(%err, "clipboard unavailable");
                None
            }
        };
        Self { inner }
    }
}

impl Default for SystemClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipboardWriter for SystemClipboard {
    fn available(&self) -> bool {
        self.inner.is_some()
    }

    fn copy_text(&mut self, text: &str) -> Result<(), String> {
        match &mut self.inner {
            Some(clipboard) => clipboard
                .set_text(text.to_string())
                .map_err(|e| format!("clipboard write failed: {e}")),
            None => Err("no clipboard available in this session".to_string()),
        }
    }
}

/// Used under `--no-clipboard` and in headless test runs.
pub struct NoopClipboard;

impl ClipboardWriter for NoopClipboard {
    fn available(&self) -> bool {
        false
    }

    fn copy_text(&mut self, _text: &str) -> Result<(), String> {
        Err("clipboard disabled".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_clipboard_refuses() {
        let mut clip = NoopClipboard;
        assert!(!clip.available());
        assert!(clip.copy_text("secret").is_err());
    }
}
