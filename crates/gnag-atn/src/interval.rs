use std::fmt;

/// Inclusive range of symbol values.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Interval {
    pub start: i32,
    pub end: i32,
}

impl Interval {
    pub fn new(start: i32, end: i32) -> Interval {
        Interval { start, end }
    }
    pub fn len(self) -> u64 {
        (self.end as i64 - self.start as i64 + 1).max(0) as u64
    }
}

/// Sorted list of disjoint, non adjacent intervals.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct IntervalSet {
    intervals: Vec<Interval>,
}

impl IntervalSet {
    pub fn new() -> IntervalSet {
        IntervalSet::default()
    }
    pub fn of_range(start: i32, end: i32) -> IntervalSet {
        let mut set = IntervalSet::new();
        set.add_range(start, end);
        set
    }
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
    /// Number of values in the set.
    pub fn len(&self) -> u64 {
        self.intervals.iter().map(|i| i.len()).sum()
    }
    pub fn contains(&self, value: i32) -> bool {
        self.intervals
            .binary_search_by(|i| {
                if i.end < value {
                    std::cmp::Ordering::Less
                } else if i.start > value {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }
    pub fn add(&mut self, value: i32) {
        self.add_range(value, value);
    }
    /// Adds `start..=end`, reversed ranges are ignored.
    pub fn add_range(&mut self, start: i32, end: i32) {
        if start > end {
            return;
        }
        let mut new = Interval::new(start, end);
        let mut out = Vec::with_capacity(self.intervals.len() + 1);
        let mut placed = false;
        for &i in &self.intervals {
            if (i.end as i64) < new.start as i64 - 1 {
                out.push(i);
            } else if (new.end as i64) < i.start as i64 - 1 {
                if !placed {
                    out.push(new);
                    placed = true;
                }
                out.push(i);
            } else {
                new = Interval::new(new.start.min(i.start), new.end.max(i.end));
            }
        }
        if !placed {
            out.push(new);
        }
        self.intervals = out;
    }
    pub fn add_set(&mut self, other: &IntervalSet) {
        for i in &other.intervals {
            self.add_range(i.start, i.end);
        }
    }
    /// Values in `min..=max` missing from this set.
    pub fn complement(&self, min: i32, max: i32) -> IntervalSet {
        let mut out = IntervalSet::new();
        let mut next = min as i64;
        for i in &self.intervals {
            if (i.end as i64) < next {
                continue;
            }
            if i.start as i64 > max as i64 {
                break;
            }
            if (i.start as i64) > next {
                out.intervals
                    .push(Interval::new(next as i32, i.start - 1));
            }
            next = i.end as i64 + 1;
        }
        if next <= max as i64 {
            out.intervals.push(Interval::new(next as i32, max));
        }
        out
    }
}

impl fmt::Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (k, i) in self.intervals.iter().enumerate() {
            if k > 0 {
                f.write_str(", ")?;
            }
            if i.start == i.end {
                write!(f, "{}", i.start)?;
            } else {
                write!(f, "{}..{}", i.start, i.end)?;
            }
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_overlapping_and_adjacent() {
        let mut set = IntervalSet::new();
        set.add_range(10, 20);
        set.add_range(1, 3);
        set.add(4);
        set.add_range(15, 30);
        assert_eq!(
            set.intervals(),
            &[Interval::new(1, 4), Interval::new(10, 30)]
        );
        assert_eq!(set.len(), 25);
        assert!(set.contains(4));
        assert!(!set.contains(5));
        assert_eq!(set.to_string(), "{1..4, 10..30}");
    }

    #[test]
    fn complement_within_bounds() {
        let mut set = IntervalSet::of_range('a' as i32, 'z' as i32);
        set.add('_' as i32);
        let inverted = set.complement(0, 0x7f);
        assert!(!inverted.contains('q' as i32));
        assert!(!inverted.contains('_' as i32));
        assert!(inverted.contains('A' as i32));
        assert!(inverted.contains(0x7f));
        assert_eq!(inverted.len(), 128 - 27);
        assert!(IntervalSet::of_range(0, 10).complement(0, 10).is_empty());
    }
}
