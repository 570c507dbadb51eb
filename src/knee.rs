//! Selection of the cell barcodes: keep roughly the `n` most frequent barcodes.

use std::num::NonZeroUsize;

use ahash::AHashMap;
use log::info;
use smallvec::SmallVec;

use crate::barcode::BarcodeTally;

/// Minimum count a barcode needs to be kept, given the counts sorted ascending. Returns `None`
/// when there are no counts.
///
/// With fewer than `target` barcodes the smallest count is the cutoff and every barcode passes,
/// otherwise it is the `target`th highest count.
pub fn count_cutoff(sorted_counts: &[u64], target: NonZeroUsize) -> Option<u64> {
    let target = target.get();
    if sorted_counts.len() < target {
        sorted_counts.first().copied()
    } else {
        Some(sorted_counts[sorted_counts.len() - target])
    }
}

/// Barcodes that passed the count cutoff with their counts.
#[derive(Debug, Default)]
pub struct RetainedBarcodes {
    counts: AHashMap<String, u64>,
    cutoff: Option<u64>,
    max_count: Option<u64>,
}

impl RetainedBarcodes {
    /// Keep every barcode with a count of at least the cutoff for `target` cells. Barcodes tied
    /// at the cutoff are all kept.
    pub fn filter(tally: BarcodeTally, target: NonZeroUsize) -> RetainedBarcodes {
        let mut counts = tally.into_counts();
        let mut sorted: Vec<u64> = counts.values().copied().collect();
        sorted.sort_unstable();

        let cutoff = match count_cutoff(&sorted, target) {
            Some(cutoff) => cutoff,
            None => {
                info!("no barcodes to filter");
                return RetainedBarcodes::default();
            }
        };
        let max_count = sorted.last().copied();
        drop(sorted);

        counts.retain(|_, count| *count >= cutoff);
        counts.shrink_to_fit();

        let retained = RetainedBarcodes { counts, cutoff: Some(cutoff), max_count };
        if let Some(max) = max_count {
            info!("max count for a barcode: {}", max);
            for barcode in retained.barcodes_at_max() {
                info!("barcode at max count: {}", barcode);
            }
        }
        info!(
            "kept {} barcodes with a count of at least {}",
            retained.len(),
            cutoff
        );

        retained
    }

    pub fn contains(&self, barcode: &str) -> bool {
        self.counts.contains_key(barcode)
    }

    pub fn count(&self, barcode: &str) -> Option<u64> {
        self.counts.get(barcode).copied()
    }

    pub fn cutoff(&self) -> Option<u64> {
        self.cutoff
    }

    pub fn max_count(&self) -> Option<u64> {
        self.max_count
    }

    /// Barcodes reaching the maximum count, sorted.
    pub fn barcodes_at_max(&self) -> SmallVec<[&str; 4]> {
        let mut at_max: SmallVec<[&str; 4]> = match self.max_count {
            Some(max) => self
                .counts
                .iter()
                .filter(|&(_, &count)| count == max)
                .map(|(barcode, _)| barcode.as_str())
                .collect(),
            None => SmallVec::new(),
        };
        at_max.sort_unstable();
        at_max
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(counts: &[(&str, u64)]) -> BarcodeTally {
        counts.iter().map(|&(b, c)| (b.to_string(), c)).collect()
    }

    fn n(v: usize) -> NonZeroUsize {
        NonZeroUsize::new(v).unwrap()
    }

    #[test]
    fn nth_highest_count() {
        let t = tally(&[("AA", 10), ("BB", 7), ("CC", 3), ("DD", 1)]);
        let r = RetainedBarcodes::filter(t, n(2));
        assert_eq!(r.cutoff(), Some(7));
        assert_eq!(r.len(), 2);
        assert_eq!(r.count("AA"), Some(10));
        assert_eq!(r.count("BB"), Some(7));
        assert!(!r.contains("CC"));
        assert!(!r.contains("DD"));
        assert_eq!(r.max_count(), Some(10));
        assert_eq!(r.barcodes_at_max().as_slice(), &["AA"]);
    }

    #[test]
    fn fewer_barcodes_than_cells() {
        let t = tally(&[("AA", 10), ("BB", 7), ("CC", 3)]);
        let r = RetainedBarcodes::filter(t, n(8000));
        assert_eq!(r.cutoff(), Some(3));
        assert_eq!(r.len(), 3);

        let t = tally(&[("AA", 10), ("BB", 7), ("CC", 3)]);
        let r = RetainedBarcodes::filter(t, n(3));
        assert_eq!(r.cutoff(), Some(3));
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn ties_at_cutoff_are_kept() {
        let t = tally(&[("AA", 9), ("BB", 5), ("CC", 5), ("DD", 5), ("EE", 2)]);
        let r = RetainedBarcodes::filter(t, n(2));
        assert_eq!(r.cutoff(), Some(5));
        assert_eq!(r.len(), 4);
        assert!(!r.contains("EE"));
    }

    #[test]
    fn all_at_max_are_reported() {
        let t = tally(&[("GG", 4), ("AA", 4), ("CC", 1)]);
        let r = RetainedBarcodes::filter(t, n(1));
        assert_eq!(r.cutoff(), Some(4));
        assert_eq!(r.barcodes_at_max().as_slice(), &["AA", "GG"]);
    }

    #[test]
    fn empty_tally() {
        let r = RetainedBarcodes::filter(BarcodeTally::default(), n(10));
        assert!(r.is_empty());
        assert_eq!(r.cutoff(), None);
        assert_eq!(r.max_count(), None);
        assert!(r.barcodes_at_max().is_empty());
        assert_eq!(count_cutoff(&[], n(1)), None);
    }

    #[test]
    fn cutoff_is_monotone_in_target() {
        let counts = [1, 1, 2, 3, 3, 3, 8, 13, 21, 21, 40];
        let mut previous = u64::MAX;
        for target in 1..=(counts.len() + 3) {
            let cutoff = count_cutoff(&counts, n(target)).unwrap();
            assert!(cutoff <= previous, "target {} raised the cutoff", target);
            previous = cutoff;
        }
    }
}
