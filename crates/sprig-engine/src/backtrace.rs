//! Trap backtraces.

use serde::Serialize;

/// One unwound frame: the faulting operation or a call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BacktraceFrame {
    /// Index in the module's function space.
    pub function_index: u32,
    pub function_name: String,
    pub module: String,
    /// Short module fingerprint.
    pub fingerprint: String,
    /// Byte offset of the opcode in the module binary.
    pub module_offset: u32,
}

/// Frames recorded while a trap unwinds, innermost first.
///
/// Recording stops at the configured limit; once a frame is dropped the
/// backtrace is marked truncated and nothing further is recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Backtrace {
    pub frames: Vec<BacktraceFrame>,
    pub truncated: bool,
}

impl Backtrace {
    pub(crate) fn push(&mut self, frame: BacktraceFrame, limit: usize) {
        if self.truncated {
            return;
        }
        if self.frames.len() >= limit {
            self.truncated = true;
            return;
        }
        self.frames.push(frame);
    }

    pub(crate) fn mark_truncated(&mut self) {
        self.truncated = true;
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
