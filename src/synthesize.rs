//! # Name Synthesizer
//!
//! The inverse of imputation: given a demographic partition, draw names in proportion
//! to how often they occur in the reference data. Sampling is inverse-CDF over an
//! explicit cumulative array built in source row order, so a given seed always yields
//! the same names and rows with zero weight can never be selected.

use crate::reference::ReferenceTables;
use crate::types::{RaceEthnicity, Sex};
use rand::Rng;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("No first-name data is loaded for birth year {0}.")]
    UnknownYear(i32),
    #[error("No names in partition '{0}' carry a positive weight; nothing can be sampled.")]
    EmptyPartition(String),
}

/// A frequency table normalized into cumulative probabilities.
#[derive(Debug, Clone)]
pub struct WeightedNames<'t> {
    names: Vec<&'t str>,
    cumulative: Vec<f64>,
    last_selectable: usize,
}

impl<'t> WeightedNames<'t> {
    /// Builds the table from `(name, weight)` pairs in the order given. Negative or
    /// non-finite weights count as zero.
    pub fn from_weights<I>(items: I, partition: &str) -> Result<Self, SynthesisError>
    where
        I: IntoIterator<Item = (&'t str, f64)>,
    {
        let (names, weights): (Vec<&'t str>, Vec<f64>) = items
            .into_iter()
            .map(|(name, w)| (name, if w.is_finite() && w > 0.0 { w } else { 0.0 }))
            .unzip();

        let total: f64 = weights.iter().sum();
        let Some(last_selectable) = weights.iter().rposition(|&w| w > 0.0) else {
            return Err(SynthesisError::EmptyPartition(partition.to_string()));
        };

        let mut running = 0.0;
        let cumulative = weights
            .iter()
            .map(|&w| {
                running += w / total;
                running
            })
            .collect();

        Ok(Self {
            names,
            cumulative,
            last_selectable,
        })
    }

    /// First names of one sex for one birth year, weighted by that sex's count.
    pub fn for_first_names(
        tables: &'t ReferenceTables,
        sex: Sex,
        birth_year: i32,
    ) -> Result<Self, SynthesisError> {
        let partition = tables
            .first_names()
            .year(birth_year)
            .ok_or(SynthesisError::UnknownYear(birth_year))?;
        Self::from_weights(
            partition
                .rows()
                .iter()
                .map(|row| (&*row.name, row.count(sex) as f64)),
            &format!("{sex}/{birth_year}"),
        )
    }

    /// Surnames weighted by `count * percentage` for `category`.
    pub fn for_last_names(
        tables: &'t ReferenceTables,
        category: RaceEthnicity,
    ) -> Result<Self, SynthesisError> {
        Self::from_weights(
            tables
                .surnames()
                .rows()
                .iter()
                .map(|row| (&*row.name, row.weight(category))),
            category.column_name(),
        )
    }

    /// The first name whose cumulative probability strictly exceeds `draw` (in `[0, 1)`).
    pub fn pick(&self, draw: f64) -> &'t str {
        let index = self.cumulative.partition_point(|&c| c <= draw);
        // Rounding can leave the final cumulative value a hair below 1.
        self.names[index.min(self.last_selectable)]
    }

    /// Draws `count` names independently, with replacement.
    pub fn sample<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<String> {
        (0..count)
            .map(|_| self.pick(rng.gen_range(0.0..1.0)).to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

pub fn sample_first_name<R: Rng + ?Sized>(
    tables: &ReferenceTables,
    sex: Sex,
    birth_year: i32,
    count: usize,
    rng: &mut R,
) -> Result<Vec<String>, SynthesisError> {
    Ok(WeightedNames::for_first_names(tables, sex, birth_year)?.sample(count, rng))
}

pub fn sample_last_name<R: Rng + ?Sized>(
    tables: &ReferenceTables,
    category: RaceEthnicity,
    count: usize,
    rng: &mut R,
) -> Result<Vec<String>, SynthesisError> {
    Ok(WeightedNames::for_last_names(tables, category)?.sample(count, rng))
}
