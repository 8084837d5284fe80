//! Wave ordering.
//!
//! Units are interleaved with a fixed stride: with stride 10 the first wave
//! holds offsets 0, 10, 20, ... from the first unit of the document, the
//! second wave offsets 1, 11, 21, ... and so on. Each wave seeds sparse
//! anchor translations that later waves use as predecessor context.

use interlinear_core::TextUnit;

/// One interleaved pass over the document.
#[derive(Debug, Clone)]
pub struct Wave {
    /// 1-based wave number.
    pub number: usize,
    /// Units of this wave, in index order.
    pub units: Vec<TextUnit>,
}

/// 0-based wave slot of `index` for a document starting at `first_index`.
pub fn wave_slot(index: i32, first_index: i32, stride: usize) -> usize {
    let stride = stride.max(1) as i64;
    (i64::from(index) - i64::from(first_index)).rem_euclid(stride) as usize
}

/// Group `units` into waves. Empty slots are skipped, so a resumed run with
/// few remaining units may have fewer waves than `stride`.
pub fn plan_waves(units: Vec<TextUnit>, first_index: i32, stride: usize) -> Vec<Wave> {
    let stride = stride.max(1);
    let mut slots: Vec<Vec<TextUnit>> = vec![Vec::new(); stride];
    for unit in units {
        let slot = wave_slot(unit.index, first_index, stride);
        slots[slot].push(unit);
    }

    slots
        .into_iter()
        .filter(|units| !units.is_empty())
        .enumerate()
        .map(|(i, mut units)| {
            units.sort_by_key(|u| u.index);
            Wave { number: i + 1, units }
        })
        .collect()
}
