//! Picks a compilation target when the submission did not name one.

use crate::artifacts::{CompilationTarget, CompilerOutput};
use tracing::debug;

/// Resolves an unset compilation target against a compiler output.
///
/// Returns `None` and changes nothing when `target.name` is already set; an
/// explicitly supplied target is never overridden, even if a longer-bytecode
/// candidate exists. Otherwise scans every `(path, name, contract)` triple in
/// stable enumeration order and picks the candidate with the longest
/// non-empty creation bytecode object; on an exact length tie the first
/// candidate seen wins. Entries with empty bytecode (interfaces, abstract
/// contracts) are never candidates.
///
/// The longest bytecode in a compilation unit is empirically the "main"
/// contract rather than a helper library. This is a heuristic kept for
/// compatibility with existing verifications, not a guarantee.
pub fn resolve_target(
    output: &CompilerOutput,
    target: &CompilationTarget,
) -> Option<CompilationTarget> {
    if !target.is_unresolved() {
        return None
    }

    let mut max_len = 0usize;
    let mut resolved: Option<CompilationTarget> = None;
    for (path, name, contract) in output.contracts_iter() {
        let len = contract.evm.bytecode.object.len();
        if len > max_len {
            max_len = len;
            resolved = Some(CompilationTarget::new(path, name));
        }
    }

    if let Some(ref target) = resolved {
        debug!(path = %target.path, contract = %target.name, "resolved missing compilation target");
    }
    resolved
}
