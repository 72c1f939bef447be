// pass.rs — Pass descriptor module: metadata, dependency resolution, certificates
//
// Declares the two channel passes (parse is outside the runner), their
// dependency edges and the postconditions their certificates check. Used by
// the pipeline runner to compute the minimal pass subset for each --emit
// target.

use std::collections::HashSet;

// ── Pass identifiers ───────────────────────────────────────────────────────

/// Identifies each channel pass (parse excluded, handled before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Promote,
    Combine,
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a channel pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Postconditions checked by the pass certificate, quoted when it fails.
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Promote => PassDescriptor {
            name: "promote",
            inputs: &[],
            invariants: "no element access of promoted channels, \
                         bulk transfers paired, flags realized",
        },
        PassId::Combine => PassDescriptor {
            name: "combine",
            inputs: &[PassId::Promote],
            invariants: "member channels removed, combined channels realized once",
        },
    }
}

/// All passes in canonical order.
pub const ALL_PASSES: [PassId; 2] = [PassId::Promote, PassId::Combine];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Certificates ───────────────────────────────────────────────────────────

/// Post-pass evidence: a set of named boolean obligations.
pub trait StageCert {
    /// True when every obligation holds.
    fn all_pass(&self) -> bool;

    /// Each obligation's name and outcome, in a stable order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;

    /// Names of the obligations that do not hold.
    fn failed(&self) -> Vec<&'static str> {
        self.obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_passes_combine_includes_promote() {
        assert_eq!(
            required_passes(PassId::Combine),
            vec![PassId::Promote, PassId::Combine]
        );
    }

    #[test]
    fn required_passes_promote_is_minimal() {
        assert_eq!(required_passes(PassId::Promote), vec![PassId::Promote]);
    }

    #[test]
    fn all_descriptors_state_invariants() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            assert!(
                !desc.invariants.is_empty(),
                "pass {:?} has no invariants declared",
                pass
            );
        }
    }

    #[test]
    fn dependency_edges_are_consistent() {
        for pass in &ALL_PASSES {
            let order = required_passes(*pass);
            let self_pos = order.iter().position(|p| p == pass);
            for dep in descriptor(*pass).inputs {
                let dep_pos = order.iter().position(|p| p == dep);
                assert!(
                    dep_pos < self_pos,
                    "{:?} depends on {:?} but it comes later in topological order",
                    pass,
                    dep
                );
            }
        }
    }

    struct Fixed(bool, bool);

    impl StageCert for Fixed {
        fn all_pass(&self) -> bool {
            self.0 && self.1
        }

        fn obligations(&self) -> Vec<(&'static str, bool)> {
            vec![("first", self.0), ("second", self.1)]
        }
    }

    #[test]
    fn failed_lists_broken_obligations() {
        assert!(Fixed(true, true).failed().is_empty());
        assert_eq!(Fixed(true, false).failed(), vec!["second"]);
    }
}
