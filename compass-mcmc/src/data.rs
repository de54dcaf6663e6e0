//! Validated inputs: paired count matrices and the categories design.
//!
//! Both are immutable once constructed; every dimension check happens
//! here so the samplers can index without re-checking shapes.

use crate::error::{invalid_input, Result};
use ndarray::prelude::*;

/// Individual × category cell counts for one condition.
///
/// The last column is the residual category. Stored as `f64` since
/// every consumer feeds the counts into `ln_gamma`.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    counts: Array2<f64>,
    totals: Array1<f64>,
}

impl CountMatrix {
    /// Validate signed integer counts.
    ///
    /// * `counts` - individuals (rows) × categories (columns)
    pub fn new(counts: Array2<i64>) -> Result<Self> {
        if let Some(((i, k), x)) = counts.indexed_iter().find(|(_, x)| **x < 0) {
            return invalid_input(format!(
                "negative count {} for individual {} in category {}",
                x, i, k
            ));
        }
        let counts = counts.mapv(|x| x as f64);
        let totals = counts.sum_axis(Axis(1));
        Ok(Self { counts, totals })
    }

    pub fn num_individuals(&self) -> usize {
        self.counts.nrows()
    }

    pub fn num_categories(&self) -> usize {
        self.counts.ncols()
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.counts.row(i)
    }

    pub fn counts(&self) -> &Array2<f64> {
        &self.counts
    }

    /// Total cells recorded for each individual
    pub fn totals(&self) -> &Array1<f64> {
        &self.totals
    }
}

/// Stimulated and unstimulated counts with matching shapes.
#[derive(Debug, Clone)]
pub struct PairedCounts {
    pub stim: CountMatrix,
    pub unstim: CountMatrix,
}

impl PairedCounts {
    pub fn new(stim: CountMatrix, unstim: CountMatrix) -> Result<Self> {
        if stim.counts.dim() != unstim.counts.dim() {
            return invalid_input(format!(
                "stimulated counts are {:?} but unstimulated counts are {:?}",
                stim.counts.dim(),
                unstim.counts.dim()
            ));
        }
        if stim.num_categories() < 2 {
            return invalid_input(format!(
                "need at least two categories including the residual, found {}",
                stim.num_categories()
            ));
        }
        if stim.num_individuals() == 0 {
            return invalid_input("no individuals");
        }
        for (name, mat) in [("stimulated", &stim), ("unstimulated", &unstim)] {
            if let Some(i) = mat.totals.iter().position(|&n| n <= 0.0) {
                return invalid_input(format!(
                    "individual {} has no {} cells; drop it before fitting",
                    i, name
                ));
            }
        }
        Ok(Self { stim, unstim })
    }

    pub fn num_individuals(&self) -> usize {
        self.stim.num_individuals()
    }

    pub fn num_categories(&self) -> usize {
        self.stim.num_categories()
    }
}

/// Marker presence/absence per category, residual category last.
#[derive(Debug, Clone)]
pub struct CategoriesMatrix {
    category_names: Vec<Box<str>>,
    marker_names: Vec<Box<str>>,
    presence: Array2<u8>,
    degree: Vec<usize>,
}

impl CategoriesMatrix {
    /// * `category_names` - one name per row of `presence`
    /// * `marker_names` - one name per column of `presence`
    /// * `presence` - K × M binary matrix
    pub fn new(
        category_names: Vec<Box<str>>,
        marker_names: Vec<Box<str>>,
        presence: Array2<u8>,
    ) -> Result<Self> {
        let (kk, mm) = presence.dim();
        if category_names.len() != kk {
            return invalid_input(format!(
                "{} category names for {} categories",
                category_names.len(),
                kk
            ));
        }
        if marker_names.len() != mm {
            return invalid_input(format!(
                "{} marker names for {} markers",
                marker_names.len(),
                mm
            ));
        }
        if kk < 2 {
            return invalid_input(format!(
                "need at least two categories including the residual, found {}",
                kk
            ));
        }
        if presence.iter().any(|&x| x > 1) {
            return invalid_input("categories matrix must be binary");
        }

        let degree = presence
            .rows()
            .into_iter()
            .map(|r| r.iter().map(|&x| x as usize).sum())
            .collect();

        Ok(Self {
            category_names,
            marker_names,
            presence,
            degree,
        })
    }

    /// Name categories by their marker combination, e.g. `IFNg&!IL2&TNFa`.
    pub fn from_markers(marker_names: Vec<Box<str>>, presence: Array2<u8>) -> Result<Self> {
        if marker_names.len() != presence.ncols() {
            return invalid_input(format!(
                "{} marker names for {} markers",
                marker_names.len(),
                presence.ncols()
            ));
        }
        let category_names = presence
            .rows()
            .into_iter()
            .map(|r| {
                let row = r.to_vec();
                combination_label(&marker_names, &row)
            })
            .collect();
        Self::new(category_names, marker_names, presence)
    }

    /// Every non-empty marker combination ordered by degree, followed by
    /// the all-negative residual.
    pub fn full_design(marker_names: Vec<Box<str>>) -> Result<Self> {
        let mm = marker_names.len();
        if mm == 0 || mm > 16 {
            return invalid_input(format!("cannot enumerate combinations of {} markers", mm));
        }
        let mut codes: Vec<usize> = (1..(1usize << mm)).collect();
        codes.sort_by_key(|&c| (c.count_ones(), c));
        codes.push(0);

        let presence = Array2::from_shape_fn((codes.len(), mm), |(k, j)| {
            ((codes[k] >> (mm - 1 - j)) & 1) as u8
        });
        Self::from_markers(marker_names, presence)
    }

    pub fn num_categories(&self) -> usize {
        self.presence.nrows()
    }

    pub fn num_markers(&self) -> usize {
        self.presence.ncols()
    }

    /// Index of the residual/null category
    pub fn residual(&self) -> usize {
        self.num_categories() - 1
    }

    /// Categories that can carry a responder state
    pub fn responder_capable(&self) -> std::ops::Range<usize> {
        0..self.residual()
    }

    /// Number of markers expressed by category `k` (the `Counts` field)
    pub fn degree(&self, k: usize) -> usize {
        self.degree[k]
    }

    pub fn degrees(&self) -> &[usize] {
        &self.degree
    }

    pub fn category_names(&self) -> &[Box<str>] {
        &self.category_names
    }

    pub fn marker_names(&self) -> &[Box<str>] {
        &self.marker_names
    }

    pub fn presence(&self) -> &Array2<u8> {
        &self.presence
    }

    /// Check that count matrices follow this design.
    pub fn check_counts(&self, data: &PairedCounts) -> Result<()> {
        if data.num_categories() != self.num_categories() {
            return invalid_input(format!(
                "counts have {} categories but the categories matrix has {}",
                data.num_categories(),
                self.num_categories()
            ));
        }
        Ok(())
    }
}

fn combination_label(markers: &[Box<str>], row: &[u8]) -> Box<str> {
    markers
        .iter()
        .zip(row.iter())
        .map(|(m, &x)| {
            if x > 0 {
                m.to_string()
            } else {
                format!("!{}", m)
            }
        })
        .collect::<Vec<_>>()
        .join("&")
        .into_boxed_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(xs: &[&str]) -> Vec<Box<str>> {
        xs.iter().map(|&x| x.into()).collect()
    }

    #[test]
    fn negative_counts_are_rejected() {
        let counts = array![[1, 2, 3], [4, -5, 6]];
        let err = CountMatrix::new(counts).unwrap_err();
        assert!(matches!(err, crate::CompassError::InvalidInput(_)));
    }

    #[test]
    fn single_category_is_rejected() {
        let stim = CountMatrix::new(array![[10], [20]]).unwrap();
        let unstim = CountMatrix::new(array![[10], [20]]).unwrap();
        assert!(PairedCounts::new(stim, unstim).is_err());
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let stim = CountMatrix::new(array![[1, 10], [2, 20]]).unwrap();
        let unstim = CountMatrix::new(array![[1, 10, 3], [2, 20, 3]]).unwrap();
        assert!(PairedCounts::new(stim, unstim).is_err());
    }

    #[test]
    fn empty_rows_are_rejected() {
        let stim = CountMatrix::new(array![[1, 10], [0, 0]]).unwrap();
        let unstim = CountMatrix::new(array![[1, 10], [2, 20]]).unwrap();
        assert!(PairedCounts::new(stim, unstim).is_err());
    }

    #[test]
    fn full_design_puts_residual_last() {
        let cats = CategoriesMatrix::full_design(names(&["A", "B", "C"])).unwrap();
        assert_eq!(cats.num_categories(), 8);
        assert_eq!(cats.residual(), 7);
        assert_eq!(cats.degree(cats.residual()), 0);
        assert_eq!(cats.degree(0), 1);
        assert_eq!(cats.degree(6), 3);
        assert_eq!(cats.category_names()[6].as_ref(), "A&B&C");
        assert_eq!(cats.category_names()[7].as_ref(), "!A&!B&!C");
        assert!(cats.degrees()[..7].windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn non_binary_presence_is_rejected() {
        let presence = array![[1u8, 2], [0, 0]];
        assert!(CategoriesMatrix::from_markers(names(&["A", "B"]), presence).is_err());
    }
}
