//! Splitting a cycle count into per-call capture packs.

/// One hardware capture call worth of cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePack {
    /// 0-based position in the request.
    pub index: usize,
    pub cycles: usize,
}

/// Decompose `total` cycles into the fewest packs of at most `max_per_call`.
///
/// Every pack but the last is full. `max_per_call == 0` is treated as 1.
pub fn split_cycles(total: usize, max_per_call: usize) -> Vec<CapturePack> {
    let max = max_per_call.max(1);
    let full = total / max;
    let rest = total % max;
    let mut packs = Vec::with_capacity(full + usize::from(rest > 0));
    packs.extend((0..full).map(|index| CapturePack { index, cycles: max }));
    if rest > 0 {
        packs.push(CapturePack {
            index: full,
            cycles: rest,
        });
    }
    packs
}

/// Compact description such as `"2x10cy+1x1cy"`; empty input gives `"0cy"`.
pub fn pack_summary(packs: &[CapturePack]) -> String {
    let mut groups: Vec<(usize, usize)> = Vec::new();
    for p in packs {
        match groups.last_mut() {
            Some((n, cy)) if *cy == p.cycles => *n += 1,
            _ => groups.push((1, p.cycles)),
        }
    }
    if groups.is_empty() {
        return "0cy".to_string();
    }
    groups
        .iter()
        .map(|(n, cy)| format!("{n}x{cy}cy"))
        .collect::<Vec<_>>()
        .join("+")
}
