// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used by both channel passes and the
// pipeline. A warning means an optimization was skipped and the affected
// channels were left untouched; an error means the pipeline stopped.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `W0101`, `E0301`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registered diagnostic codes.
pub mod codes {
    use super::DiagCode;

    // ── Promotion (W01xx) ──
    /// No loop could be hoisted over.
    pub const W0101: DiagCode = DiagCode("W0101");
    /// Path condition restricts the written/read part of the array.
    pub const W0102: DiagCode = DiagCode("W0102");
    /// Read could not be promoted; the paired write was revoked.
    pub const W0103: DiagCode = DiagCode("W0103");
    /// Promoted write has no promoted read.
    pub const W0104: DiagCode = DiagCode("W0104");
    /// Promoted reads disagree on their guard.
    pub const W0105: DiagCode = DiagCode("W0105");

    // ── Combination (W02xx) ──
    /// Path conditions of the writes differ.
    pub const W0201: DiagCode = DiagCode("W0201");
    /// Write index arguments differ.
    pub const W0202: DiagCode = DiagCode("W0202");
    /// Channel bounds differ beyond the depth dimension.
    pub const W0203: DiagCode = DiagCode("W0203");
    /// Channels are read in different consumers.
    pub const W0204: DiagCode = DiagCode("W0204");
    /// Read index arguments differ.
    pub const W0205: DiagCode = DiagCode("W0205");
    /// Reads sit in different loops.
    pub const W0206: DiagCode = DiagCode("W0206");
    /// Read conditions differ.
    pub const W0207: DiagCode = DiagCode("W0207");
    /// Channel shape unsupported (no realize, several sites, no loop, no producer).
    pub const W0208: DiagCode = DiagCode("W0208");

    // ── Pipeline (E03xx) ──
    /// Internal invariant violated inside a pass.
    pub const E0301: DiagCode = DiagCode("E0301");
    /// Post-pass certificate failed.
    pub const E0302: DiagCode = DiagCode("E0302");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any pass.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub message: String,
    pub hint: Option<String>,
    /// Channels the diagnostic is about.
    pub channels: Vec<String>,
    pub cause_chain: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, channels, or causes.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            message: message.into(),
            hint: None,
            channels: Vec::new(),
            cause_chain: Vec::new(),
        }
    }

    pub fn warning(code: DiagCode, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Name a channel this diagnostic concerns.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channels.push(channel.into());
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>) -> Self {
        self.cause_chain.push(message.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        for cause in &self.cause_chain {
            write!(f, "\n  cause: {}", cause)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// Mirror a degrade diagnostic onto the `log` facade.
pub(crate) fn log_diagnostic(d: &Diagnostic) {
    match d.level {
        DiagLevel::Warning => log::warn!("{}", d),
        DiagLevel::Error => log::error!("{}", d),
    }
}
