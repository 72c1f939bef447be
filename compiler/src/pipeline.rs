// pipeline.rs — Compilation state and pass orchestration
//
// Holds every pass artifact and runs the minimal set of channel passes for
// a given terminal PassId: Promotion, then Combination.
//
// Preconditions: the parsed IR is set before calling run_pipeline.
// Postconditions: artifacts for all required passes are populated, or
//   has_error is set and a PipelineError is returned.
// Failure modes: a fatal ChannelError inside a pass; a failed certificate.
// Side effects: calls on_pass_complete after each pass for immediate display;
//   prints per-pass timing to stderr when verbose.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::combine::{self, CombinePlan};
use crate::diag::codes;
use crate::diag::{DiagLevel, Diagnostic};
use crate::error::ChannelError;
use crate::id::NameAllocator;
use crate::ir::Stmt;
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::promotion::{self, PromotionPlan};
use crate::struct_type::{GeneratedStruct, StructRegistry};

// ── Options ────────────────────────────────────────────────────────────────

/// Switches shared by the CLI and library users.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub promote: bool,
    pub combine: bool,
    /// Print per-pass timing to stderr.
    pub verbose: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            promote: true,
            combine: true,
            verbose: false,
        }
    }
}

impl PipelineOptions {
    fn enabled(&self, pass: PassId) -> bool {
        match pass {
            PassId::Promote => self.promote,
            PassId::Combine => self.combine,
        }
    }
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Per-pass outputs. A disabled pass passes its input through unchanged
/// with an empty plan.
#[derive(Debug, Default)]
pub struct Artifacts {
    pub promotion_plan: Option<PromotionPlan>,
    pub promoted: Option<Stmt>,
    pub combine_plan: Option<CombinePlan>,
    pub combined: Option<Stmt>,
}

/// Provenance metadata for reproducible runs and cache-key use.
///
/// `source_hash`: SHA-256 of the raw `.ir` source text.
/// `ir_fingerprint`: SHA-256 of the canonical printed IR, stable across
/// whitespace and comment edits.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub ir_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the IR fingerprint (64 characters).
    pub fn ir_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.ir_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        let value = serde_json::json!({
            "source_hash": self.source_hash_hex(),
            "ir_fingerprint": self.ir_fingerprint_hex(),
            "compiler_version": self.compiler_version,
        });
        format!("{value:#}\n")
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from source text and its parsed IR.
pub fn compute_provenance(source: &str, ir: &Stmt) -> Provenance {
    Provenance {
        source_hash: sha256(source.as_bytes()),
        ir_fingerprint: sha256(ir.to_string().as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    /// The parsed input IR.
    pub source: Stmt,
    pub artifacts: Artifacts,
    /// Fresh-name counters shared by every pass of this compilation.
    pub names: NameAllocator,
    pub structs: StructRegistry,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(source: Stmt) -> Self {
        Self {
            source,
            artifacts: Artifacts::default(),
            names: NameAllocator::new(),
            structs: StructRegistry::new(),
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }

    /// The most-rewritten IR produced so far.
    pub fn output(&self) -> &Stmt {
        self.artifacts
            .combined
            .as_ref()
            .or(self.artifacts.promoted.as_ref())
            .unwrap_or(&self.source)
    }

    fn promoted_or_source(&self) -> &Stmt {
        self.artifacts.promoted.as_ref().unwrap_or(&self.source)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagLevel::Warning)
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution stopped. The matching error diagnostic is also in
/// `CompilationState.diagnostics`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A pass hit a broken structural invariant.
    #[error("{} failed: {source}", pass_name(.pass))]
    Channel { pass: PassId, source: ChannelError },

    /// The rewritten IR does not satisfy the pass certificate.
    #[error("{} verification failed: {failed}", pass_name(.pass))]
    Certificate { pass: PassId, failed: String },
}

impl PipelineError {
    /// The pass that produced the error.
    pub fn failing_pass(&self) -> PassId {
        match self {
            PipelineError::Channel { pass, .. } | PipelineError::Certificate { pass, .. } => *pass,
        }
    }

    fn to_diagnostic(&self) -> Diagnostic {
        let code = match self {
            PipelineError::Channel { .. } => codes::E0301,
            PipelineError::Certificate { .. } => codes::E0302,
        };
        Diagnostic::new(DiagLevel::Error, self.to_string()).with_code(code)
    }
}

fn pass_name(pass: &PassId) -> &'static str {
    descriptor(*pass).name
}

/// Map a failed certificate to a pipeline error.
fn check_cert(pass: PassId, cert: &impl StageCert) -> Result<(), PipelineError> {
    if cert.all_pass() {
        return Ok(());
    }
    Err(PipelineError::Certificate {
        pass,
        failed: format!(
            "{} (requires {})",
            cert.failed().join(", "),
            descriptor(pass).invariants
        ),
    })
}

// ── Per-pass bookkeeping ───────────────────────────────────────────────────

/// Per-pass post-processing: callback, accumulate, verbose, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    mut diags: Vec<Diagnostic>,
    outcome: Result<(), PipelineError>,
    elapsed: Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    if let Err(e) = &outcome {
        diags.push(e.to_diagnostic());
    }
    on_pass_complete(pass_id, &diags);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "t2sc: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if outcome.is_err() {
        state.has_error = true;
    }
    outcome
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → verify → on_pass_complete(callback) →
/// verbose → error check. A disabled pass copies its input forward.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &PipelineOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        if !options.enabled(pass_id) {
            log::debug!("{} disabled", descriptor(pass_id).name);
            skip_pass(state, pass_id);
            if options.verbose {
                eprintln!("t2sc: {} skipped", descriptor(pass_id).name);
            }
            continue;
        }

        let t = Instant::now();
        let (diags, outcome) = match pass_id {
            PassId::Promote => run_promote(state),
            PassId::Combine => run_combine(state),
        };
        let elapsed = t.elapsed();
        finish_pass(
            state,
            pass_id,
            diags,
            outcome,
            elapsed,
            options.verbose,
            &mut on_pass_complete,
        )?;
    }
    Ok(())
}

fn skip_pass(state: &mut CompilationState, pass_id: PassId) {
    match pass_id {
        PassId::Promote => {
            state.artifacts.promotion_plan = Some(PromotionPlan::default());
            state.artifacts.promoted = Some(state.source.clone());
        }
        PassId::Combine => {
            state.artifacts.combine_plan = Some(CombinePlan::default());
            state.artifacts.combined = Some(state.promoted_or_source().clone());
        }
    }
}

type PassOutcome = (Vec<Diagnostic>, Result<(), PipelineError>);

fn run_promote(state: &mut CompilationState) -> PassOutcome {
    let fatal = |source| PipelineError::Channel {
        pass: PassId::Promote,
        source,
    };
    let analysis = match promotion::analyze_promotion(&state.source) {
        Ok(a) => a,
        Err(e) => return (Vec::new(), Err(fatal(e))),
    };
    log::debug!("promotion plan: {} records", analysis.plan.len());
    let promoted = match promotion::promote_channels(&state.source, &analysis.plan) {
        Ok(s) => s,
        Err(e) => return (analysis.diagnostics, Err(fatal(e))),
    };
    let cert = promotion::verify_promotion(&promoted, &analysis.plan);
    state.artifacts.promotion_plan = Some(analysis.plan);
    state.artifacts.promoted = Some(promoted);
    (analysis.diagnostics, check_cert(PassId::Promote, &cert))
}

fn run_combine(state: &mut CompilationState) -> PassOutcome {
    let fatal = |source| PipelineError::Channel {
        pass: PassId::Combine,
        source,
    };
    let input = state.promoted_or_source().clone();
    let analysis =
        match combine::analyze_combination(&input, &mut state.names, &mut state.structs) {
            Ok(a) => a,
            Err(e) => return (Vec::new(), Err(fatal(e))),
        };
    log::debug!("combine plan: {} groups", analysis.plan.groups().len());
    let combined = match combine::combine_channels(&input, &analysis.plan) {
        Ok(s) => s,
        Err(e) => return (analysis.diagnostics, Err(fatal(e))),
    };
    let cert = combine::verify_combination(&combined, &analysis.plan);
    state.artifacts.combine_plan = Some(analysis.plan);
    state.artifacts.combined = Some(combined);
    (analysis.diagnostics, check_cert(PassId::Combine, &cert))
}

// ── Report ─────────────────────────────────────────────────────────────────

/// Decision tables and diagnostics of one compilation, for `--emit plan`.
#[derive(Debug, Serialize)]
pub struct PipelineReport<'a> {
    pub compiler_version: &'static str,
    pub promoted_channels: Option<&'a PromotionPlan>,
    pub combined_channels: Option<&'a CombinePlan>,
    pub structs: &'a [GeneratedStruct],
    pub diagnostics: &'a [Diagnostic],
}

impl<'a> PipelineReport<'a> {
    pub fn new(state: &'a CompilationState) -> Self {
        Self {
            compiler_version: env!("CARGO_PKG_VERSION"),
            promoted_channels: state.artifacts.promotion_plan.as_ref(),
            combined_channels: state.artifacts.combine_plan.as_ref(),
            structs: state.structs.structs(),
            diagnostics: &state.diagnostics,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct Outcome(Vec<(&'static str, bool)>);

    impl StageCert for Outcome {
        fn all_pass(&self) -> bool {
            self.0.iter().all(|(_, ok)| *ok)
        }

        fn obligations(&self) -> Vec<(&'static str, bool)> {
            self.0.clone()
        }
    }

    #[test]
    fn passing_certificate_is_ok() {
        let cert = Outcome(vec![("P1_no_element_access", true), ("P2_symmetric", true)]);
        assert!(check_cert(PassId::Promote, &cert).is_ok());
    }

    #[test]
    fn failed_certificate_quotes_pass_invariants() {
        let cert = Outcome(vec![("C1_members_removed", true), ("C2_realized_once", false)]);
        let err = check_cert(PassId::Combine, &cert).unwrap_err();
        assert_eq!(err.failing_pass(), PassId::Combine);
        assert_eq!(
            err.to_string(),
            "combine verification failed: C2_realized_once (requires member channels removed, \
             combined channels realized once)"
        );
        let diag = err.to_diagnostic();
        assert_eq!(diag.level, DiagLevel::Error);
        assert_eq!(diag.code, Some(codes::E0302));
    }
}
