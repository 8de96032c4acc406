use bytemuck::{Pod, Zeroable};
use std::fmt::Debug;

/// A matrix of some element type, host or device resident.
pub trait Matrix: Debug {
    type Value: Copy + Debug + Default + Pod + Zeroable;

    /// Returns the dimensions of the matrix as (rows, columns).
    fn dims(&self) -> (usize, usize);

    fn rows(&self) -> usize {
        self.dims().0
    }

    fn cols(&self) -> usize {
        self.dims().1
    }

    fn is_square(&self) -> bool {
        let (rows, cols) = self.dims();
        rows == cols
    }
}

/// A vector of some element type, host or device resident.
pub trait Vector: Debug {
    type Value: Copy + Debug + Default + Pod + Zeroable;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
