//! The fully verified prefix of a scan.
//!
//! Ranges finish out of order, so the scan-wide position is the last ledger
//! `L` such that every ledger in `from..=L` has been verified: walk the
//! ranges in order and stop at the first one that is not complete.

#[derive(Clone, Copy, Debug)]
struct Span {
    from: u32,
    to: u32,
    verified: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct ScanFrontier {
    spans: Vec<Span>,
    position: u32,
}

impl ScanFrontier {
    /// `bounds` are the `(from, to)` of each range, contiguous and in order.
    pub fn new(bounds: impl IntoIterator<Item = (u32, u32)>) -> Self {
        let spans: Vec<Span> = bounds
            .into_iter()
            .map(|(from, to)| Span {
                from,
                to,
                verified: None,
            })
            .collect();
        let position = spans.first().map_or(0, |s| s.from.saturating_sub(1));
        Self { spans, position }
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    /// Records that range `index` has verified everything up to `ledger`.
    /// Returns the new frontier when it moved.
    pub fn record(&mut self, index: usize, ledger: u32) -> Option<u32> {
        let span = self.spans.get_mut(index)?;
        let ledger = ledger.min(span.to);
        if span.verified.is_some_and(|current| current >= ledger) {
            return None;
        }
        span.verified = Some(ledger);

        let next = self.contiguous_end();
        if next > self.position {
            self.position = next;
            Some(next)
        } else {
            None
        }
    }

    pub fn range_verified(&self, index: usize) -> Option<u32> {
        self.spans.get(index).and_then(|s| s.verified)
    }

    fn contiguous_end(&self) -> u32 {
        let mut end = self.position;
        for span in &self.spans {
            match span.verified {
                Some(v) if v == span.to => end = span.to,
                Some(v) => return v,
                None => return end.max(span.from.saturating_sub(1)),
            }
        }
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_ranges() -> ScanFrontier {
        ScanFrontier::new([(1, 127), (128, 255), (256, 383), (384, 511)])
    }

    #[test]
    fn later_ranges_do_not_move_the_frontier() {
        let mut frontier = four_ranges();
        assert_eq!(frontier.position(), 0);
        assert_eq!(frontier.record(2, 383), None);
        assert_eq!(frontier.record(1, 191), None);
        assert_eq!(frontier.position(), 0);
    }

    #[test]
    fn frontier_jumps_when_the_prefix_closes() {
        let mut frontier = four_ranges();
        frontier.record(1, 255);
        frontier.record(2, 319);
        assert_eq!(frontier.record(0, 63), Some(63));
        assert_eq!(frontier.record(0, 127), Some(319));
        assert_eq!(frontier.record(2, 383), Some(383));
    }

    #[test]
    fn frontier_is_monotone() {
        let mut frontier = four_ranges();
        frontier.record(0, 100);
        assert_eq!(frontier.record(0, 50), None);
        assert_eq!(frontier.position(), 100);
        assert_eq!(frontier.range_verified(0), Some(100));
    }

    #[test]
    fn unknown_range_is_ignored() {
        let mut frontier = four_ranges();
        assert_eq!(frontier.record(9, 10), None);
    }
}
