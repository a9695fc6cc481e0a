//! Piecewise-linear 1-D transform defined by a lookup table.
//!
//! Index space `[0, N−1]` is mapped onto the table values by linear
//! interpolation between neighbouring entries. When the table is
//! non-decreasing the mapping can be inverted by binary search, which is how
//! the estimator turns a coordinate back into a (fractional) slice position
//! and how a similarity value is turned back into a distance.
//!
//! ```text
//! apply(x)         = lut[⌊x⌋] + (x − ⌊x⌋) · (lut[⌊x⌋+1] − lut[⌊x⌋])
//! apply_inverse(y) = i + (y − lut[i]) / (lut[i+1] − lut[i]),   lut[i] ≤ y
//! ```
//!
//! Arguments outside the table's domain (or range, for the inverse) map to
//! `-∞` / `+∞` sentinels rather than being extrapolated.

/// Lookup-table transform borrowing its table.
#[derive(Debug, Clone, Copy)]
pub struct LutTransform<'a> {
    lut: &'a [f64],
}

impl<'a> LutTransform<'a> {
    /// Wrap a lookup table.
    ///
    /// # Panics
    ///
    /// Panics if `lut` is empty.
    pub fn new(lut: &'a [f64]) -> Self {
        assert!(!lut.is_empty(), "lookup table must not be empty");
        Self { lut }
    }

    /// The underlying table.
    pub fn table(&self) -> &'a [f64] {
        self.lut
    }

    /// Largest valid source coordinate, `N − 1`.
    #[inline]
    fn max_index(&self) -> usize {
        self.lut.len() - 1
    }

    /// Forward mapping from index space into table space.
    pub fn apply(&self, x: f64) -> f64 {
        let max = self.max_index();
        if x.is_nan() {
            return f64::NAN;
        }
        if x < 0.0 {
            return f64::NEG_INFINITY;
        }
        if x > max as f64 {
            return f64::INFINITY;
        }
        if x == max as f64 {
            return self.lut[max];
        }
        let floor = x.floor();
        let i = floor as usize;
        let dx = x - floor;
        self.lut[i] + dx * (self.lut[i + 1] - self.lut[i])
    }

    /// Inverse mapping from table space back into index space.
    ///
    /// Requires a non-decreasing table. A flat segment `lut[i] == lut[i+1]`
    /// containing `y` maps to `i`.
    pub fn apply_inverse(&self, y: f64) -> f64 {
        let max = self.max_index();
        if y.is_nan() {
            return f64::NAN;
        }
        if y < self.lut[0] {
            return f64::NEG_INFINITY;
        }
        if y > self.lut[max] {
            return f64::INFINITY;
        }
        if max == 0 {
            return 0.0;
        }

        let i = self.find_floor_index(y);
        let x1 = self.lut[i];
        let x2 = self.lut[i + 1];
        let span = x2 - x1;
        if span <= 0.0 {
            return i as f64;
        }
        i as f64 + (y - x1) / span
    }

    /// Greatest index `i ≤ N − 2` with `lut[i] ≤ y`, for `y` inside the table range.
    fn find_floor_index(&self, y: f64) -> usize {
        // Search over segment starts 0..=N-2; `lut[N-1] == y` lands on the last segment.
        let segments = &self.lut[..self.max_index()];
        segments.partition_point(|&v| v <= y).saturating_sub(1)
    }

    /// Smallest value the transform maps onto, `lut[0]`.
    pub fn min_transformed_coordinate(&self) -> f64 {
        self.lut[0]
    }

    /// Largest value the transform maps onto, `lut[N − 1]`.
    pub fn max_transformed_coordinate(&self) -> f64 {
        self.lut[self.max_index()]
    }
}
