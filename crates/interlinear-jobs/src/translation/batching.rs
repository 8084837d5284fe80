//! Token-budgeted batch packing.

use interlinear_core::{estimate_tokens, TextUnit};

/// Units submitted together in one generation request.
#[derive(Debug, Clone)]
pub struct Batch {
    pub units: Vec<TextUnit>,
    /// Estimated source tokens across all units.
    pub tokens: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Estimated token cost of one unit's source text.
pub fn unit_tokens(unit: &TextUnit) -> usize {
    estimate_tokens(&unit.source_text)
}

/// Greedily pack units, in order, into batches of at most `budget`
/// estimated tokens.
///
/// A unit is never split. A unit larger than the whole budget gets a batch of
/// its own.
pub fn pack_batches(units: Vec<TextUnit>, budget: usize) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current = Batch {
        units: Vec::new(),
        tokens: 0,
    };

    for unit in units {
        let tokens = unit_tokens(&unit);
        if !current.is_empty() && current.tokens + tokens > budget {
            batches.push(std::mem::replace(
                &mut current,
                Batch {
                    units: Vec::new(),
                    tokens: 0,
                },
            ));
        }
        current.tokens += tokens;
        current.units.push(unit);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
