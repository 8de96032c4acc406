//! Sparse column templates drawn from the random stream.

use crate::randdp::RandomStream;

/// Short sparse vector: distinct 1-based positions in `[1, n]` and their
/// values, in draw order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnTemplate {
    pub positions: Vec<usize>,
    pub values: Vec<f64>,
}

impl ColumnTemplate {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Overwrites the value at `position` if present, otherwise appends.
    pub fn set_or_append(&mut self, position: usize, value: f64) {
        match self.positions.iter().position(|&p| p == position) {
            Some(k) => self.values[k] = value,
            None => {
                self.positions.push(position);
                self.values.push(value);
            }
        }
    }
}

/// Smallest power of two that is `>= n`.
pub fn smallest_pow2_at_least(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// Draws `count` distinct positions in `[1, n]` with their values.
///
/// Each draw consumes two stream values: the element value, then the
/// location `floor(domain * u) + 1`. Locations above `n` and repeats are
/// rejected and redrawn. Terminates only if `count <= n`; callers
/// validate that up front.
pub fn sample(stream: &mut RandomStream, n: usize, count: usize, domain: usize) -> ColumnTemplate {
    let mut template = ColumnTemplate {
        positions: Vec::with_capacity(count + 1),
        values: Vec::with_capacity(count + 1),
    };
    while template.len() < count {
        let value = stream.next_value();
        let location = stream.next_value();
        let position = (domain as f64 * location) as usize + 1;
        if position > n || template.positions.contains(&position) {
            continue;
        }
        template.positions.push(position);
        template.values.push(value);
    }
    template
}
