//! Variant resolution: evaluate every variant of every register schema
//! against a canonical document and pick the single best-scoring match,
//! or report ambiguity or a miss with per-variant diagnostics.
//!
//! Resolution is predicate-driven by design: the document's
//! `meta.registry_code` never narrows the search up front, because
//! registry codes in this corpus are unreliable. A variant that wants to
//! pin a registry expresses it as a `meta.*` predicate.

use crate::{CompiledRegister, CompiledVariant, Registry, Verdict};
use serde::Serialize;
use tree::Tree;

/// Diagnostic record for one attempted variant, kept for every variant so
/// misses can drive schema-authoring feedback.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptReport {
    pub registry_code: String,
    pub variant_id: String,
    pub matched: bool,
    pub score: u32,
    pub reasons: Vec<String>,
}

pub enum Resolution<'s> {
    Match {
        register: &'s CompiledRegister,
        variant: &'s CompiledVariant,
        score: u32,
    },
    Ambiguous {
        score: u32,
        tied: Vec<String>,
        attempts: Vec<AttemptReport>,
    },
    NoMatch {
        attempts: Vec<AttemptReport>,
    },
}

/// Resolve the variant for a combined `{meta, data}` document tree.
///
/// Deterministic by construction: candidates are collected in registry
/// declaration order and sorted by a stable sort on descending score, and
/// a tie at the top score is always reported as ambiguous rather than
/// arbitrarily broken.
pub fn resolve_variant<'s>(registry: &'s Registry, doc: &Tree) -> Resolution<'s> {
    let mut attempts = Vec::new();
    let mut candidates: Vec<(&CompiledRegister, &CompiledVariant, Verdict)> = Vec::new();

    for register in registry.registers() {
        for variant in &register.variants {
            let verdict = variant.predicate.eval(doc);
            attempts.push(AttemptReport {
                registry_code: register.registry_code.clone(),
                variant_id: variant.variant_id.clone(),
                matched: verdict.matched,
                score: verdict.score,
                reasons: verdict.reasons.clone(),
            });
            if verdict.matched {
                candidates.push((register, variant, verdict));
            }
        }
    }

    if candidates.is_empty() {
        return Resolution::NoMatch { attempts };
    }

    candidates.sort_by(|a, b| b.2.score.cmp(&a.2.score));
    let top_score = candidates[0].2.score;
    let tied: Vec<&(&CompiledRegister, &CompiledVariant, Verdict)> = candidates
        .iter()
        .take_while(|c| c.2.score == top_score)
        .collect();

    if tied.len() > 1 {
        return Resolution::Ambiguous {
            score: top_score,
            tied: tied.iter().map(|c| c.1.variant_id.clone()).collect(),
            attempts,
        };
    }

    let (register, variant, verdict) = candidates.swap_remove(0);
    Resolution::Match {
        register,
        variant,
        score: verdict.score,
    }
}
