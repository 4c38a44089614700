use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;

use crate::model::{AggregationMethod, Coordinate};

/// Per-coordinate reduction state plus the contributor ledger for audit.
#[derive(Debug, Clone)]
pub struct Accumulator {
    pub method: AggregationMethod,
    /// Running total. For percentage cells this is percent points.
    pub total: Decimal,
    /// Mean divisor. Include-zeros mode pins it to the source-file count on
    /// first touch; exclude-zeros mode counts non-zero contributions.
    denominator: usize,
    contributors: HashMap<String, Decimal>,
}

impl Accumulator {
    fn new(method: AggregationMethod, initial_denominator: usize) -> Self {
        Self {
            method,
            total: Decimal::ZERO,
            denominator: initial_denominator,
            contributors: HashMap::new(),
        }
    }

    /// The divisor actually used. Clamped to 1 so a coordinate whose only
    /// contributions were zeros (exclude-zeros mode) averages to a stable
    /// 0% instead of dividing by zero.
    pub fn mean_denominator(&self) -> usize {
        self.denominator.max(1)
    }

    /// Average in percent points. Meaningful only for `Mean` accumulators.
    pub fn average(&self) -> Decimal {
        self.total / Decimal::from(self.mean_denominator() as u64)
    }

    /// The value this accumulator resolves to: the sum for `Sum`, the
    /// average (percent points) for `Mean`.
    pub fn resolved(&self) -> Decimal {
        match self.method {
            AggregationMethod::Sum => self.total,
            AggregationMethod::Mean => self.average(),
        }
    }

    /// Labels with a non-zero merged contribution.
    pub fn nonzero_contributors(&self) -> usize {
        self.contributors.values().filter(|v| !v.is_zero()).count()
    }

    pub fn contributor_count(&self) -> usize {
        self.contributors.len()
    }

    pub fn contribution_of(&self, label: &str) -> Option<Decimal> {
        self.contributors.get(label).copied()
    }

    /// Contributors sorted by label, case-insensitively, for deterministic
    /// comments and Contributions rows regardless of worker arrival order.
    pub fn sorted_contributors(&self) -> Vec<(&str, Decimal)> {
        let mut items: Vec<(&str, Decimal)> = self
            .contributors
            .iter()
            .map(|(label, value)| (label.as_str(), *value))
            .collect();
        items.sort_by(|a, b| {
            a.0.to_lowercase()
                .cmp(&b.0.to_lowercase())
                .then_with(|| a.0.cmp(b.0))
        });
        items
    }
}

/// The single reduction point of a run. Owned by one thread; workers feed
/// it through a channel.
#[derive(Debug)]
pub struct Aggregator {
    cells: BTreeMap<Coordinate, Accumulator>,
    total_files: usize,
    exclude_zero_percent: bool,
}

impl Aggregator {
    pub fn new(total_files: usize, exclude_zero_percent: bool) -> Self {
        Self {
            cells: BTreeMap::new(),
            total_files,
            exclude_zero_percent,
        }
    }

    /// Fold one contribution in. Duplicate labels at the same coordinate
    /// merge additively; the accumulator is created lazily on first touch.
    pub fn record(&mut self, coord: Coordinate, method: AggregationMethod, source: &str, value: Decimal) {
        let initial = match method {
            AggregationMethod::Mean if self.exclude_zero_percent => 0,
            AggregationMethod::Mean => self.total_files,
            AggregationMethod::Sum => 0,
        };
        let acc = self
            .cells
            .entry(coord)
            .or_insert_with(|| Accumulator::new(method, initial));

        acc.total += value;
        if acc.method == AggregationMethod::Mean && self.exclude_zero_percent && !value.is_zero() {
            acc.denominator += 1;
        }
        *acc.contributors.entry(source.to_string()).or_insert(Decimal::ZERO) += value;
    }

    pub fn total_files(&self) -> usize {
        self.total_files
    }

    pub fn exclude_zero_percent(&self) -> bool {
        self.exclude_zero_percent
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn get(&self, coord: Coordinate) -> Option<&Accumulator> {
        self.cells.get(&coord)
    }

    /// Coordinates in ascending Excel order (column letters, then row).
    pub fn iter(&self) -> impl Iterator<Item = (Coordinate, &Accumulator)> {
        self.cells.iter().map(|(coord, acc)| (*coord, acc))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
