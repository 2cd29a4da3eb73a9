//! # Reference Table Builder
//!
//! Loads the two reference datasets once at start-up and pre-aggregates them into
//! immutable lookup structures:
//!
//! - The surname table maps a normalized surname to the six race/ethnicity
//!   percentage columns of the census surname file. The percentages are kept exactly
//!   as written in the source (raw text) alongside their numeric reading.
//! - The first-name table is partitioned by birth year. Each `yobYYYY.txt` file is
//!   split by sex code, outer-joined on name and turned into female/male shares.
//!
//! Both tables keep rows in source order next to a hash index. Lookups go through
//! the index; weighted sampling walks the rows, which gives it a deterministic order.

use crate::normalize::normalize;
use crate::types::{LAST_NAME_PROBABILITY_COLUMNS, RaceEthnicity, Sex};
use ahash::AHashMap;
use log::{debug, info, warn};
use polars::prelude::*;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

/// Census marker for a suppressed small count.
pub const SUPPRESSED_SENTINEL: &str = "(S)";

static YEAR_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^yob([0-9]{4})\.txt$").expect("year file pattern is a valid regular expression")
});

/// Everything that can go wrong while building the reference tables. All of these are
/// fatal: imputation without reference data is meaningless.
#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("Failed to read reference data at '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse reference file '{}': {source}", .path.display())]
    Polars {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },
    #[error("The required column '{column}' was not found in reference file '{}'.", .path.display())]
    ColumnNotFound { path: PathBuf, column: String },
    #[error(
        "Reference file '{}' has {found} columns, but (name, sex, count) rows need at least 3.",
        .path.display()
    )]
    TooFewColumns { path: PathBuf, found: usize },
    #[error("Invalid count '{value}' on row {row} of '{}'. Counts must be non-negative integers.", .path.display())]
    InvalidCount {
        path: PathBuf,
        row: usize,
        value: String,
    },
    #[error("No first-name files named 'yobYYYY.txt' were found in '{}'.", .0.display())]
    NoYearFiles(PathBuf),
}

/// Locations of the two source datasets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSources {
    /// The census surname file (CSV with header).
    pub surnames: PathBuf,
    /// Directory holding one headerless `yobYYYY.txt` file per birth year.
    pub first_names: PathBuf,
}

// ========================================================================================
//                                    Surname side
// ========================================================================================

/// One percentage cell from the surname file.
#[derive(Debug, Clone, PartialEq)]
pub struct Percentage {
    raw: Box<str>,
    value: Option<f64>,
}

impl Percentage {
    pub fn new(raw: &str) -> Self {
        let value = raw.trim().parse::<f64>().ok().filter(|v| v.is_finite());
        Self {
            raw: raw.into(),
            value,
        }
    }

    /// The cell exactly as it appeared in the source file.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The numeric reading, `None` for `(S)` or any other non-numeric cell.
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Numeric reading with non-numeric cells coerced to zero.
    pub fn weight(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurnameRow {
    /// Surname in its source spelling.
    pub name: Box<str>,
    /// The `count` column, if the source file has one. `(S)` reads as zero.
    pub count: Option<f64>,
    pub percentages: [Percentage; 6],
}

impl SurnameRow {
    pub fn percentage(&self, category: RaceEthnicity) -> &Percentage {
        &self.percentages[category.index()]
    }

    /// Population weight of this surname within `category`: `count * percentage`.
    /// A file without a `count` column weighs every surname by its percentage alone.
    pub fn weight(&self, category: RaceEthnicity) -> f64 {
        self.count.unwrap_or(1.0) * self.percentage(category).weight()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SurnameTable {
    rows: Vec<SurnameRow>,
    index: AHashMap<Box<str>, usize>,
    duplicate_keys: usize,
}

impl SurnameTable {
    /// Builds the table from rows in source order. When two surnames normalize to
    /// the same key the first one wins; later ones are still kept for sampling.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = SurnameRow>,
    {
        let mut table = SurnameTable::default();
        for row in rows {
            let key = normalize(&row.name);
            let position = table.rows.len();
            if key.is_empty() {
                debug!("Surname '{}' normalizes to an empty key; not indexed.", row.name);
            } else if table.index.contains_key(key.as_str()) {
                table.duplicate_keys += 1;
                debug!(
                    "Surname '{}' collides with an earlier row on key '{key}'; keeping the first.",
                    row.name
                );
            } else {
                table.index.insert(key.into_boxed_str(), position);
            }
            table.rows.push(row);
        }
        table
    }

    /// Reads the census surname file.
    pub fn load(path: &Path) -> Result<Self, ReferenceError> {
        let df = read_string_frame(path, true)?;

        let column = |name: &str| -> Result<Vec<Option<String>>, ReferenceError> {
            let column = df
                .column(name)
                .map_err(|_| ReferenceError::ColumnNotFound {
                    path: path.to_path_buf(),
                    column: name.to_string(),
                })?;
            string_values(path, column)
        };

        let names = column("name")?;
        let pct_columns = LAST_NAME_PROBABILITY_COLUMNS
            .iter()
            .map(|name| column(*name))
            .collect::<Result<Vec<_>, _>>()?;

        let has_count = df.get_column_names().iter().any(|c| c.as_str() == "count");
        let counts = if has_count {
            Some(column("count")?)
        } else {
            warn!(
                "Surname file '{}' has no 'count' column; sampling will weight surnames by percentage only.",
                path.display()
            );
            None
        };

        let rows = (0..df.height()).filter_map(|i| {
            let name = names[i].as_deref()?;
            let cell = |values: &Vec<Option<String>>| values[i].as_deref().unwrap_or("").to_string();
            let percentages: [Percentage; 6] =
                std::array::from_fn(|c| Percentage::new(&cell(&pct_columns[c])));
            Some(SurnameRow {
                name: name.into(),
                count: counts
                    .as_ref()
                    .map(|values| Percentage::new(&cell(values)).weight()),
                percentages,
            })
        });

        Ok(Self::from_rows(rows.collect::<Vec<_>>()))
    }

    pub fn get(&self, key: &str) -> Option<&SurnameRow> {
        self.index.get(key).map(|&i| &self.rows[i])
    }

    /// Looks up a raw (not yet normalized) surname.
    pub fn lookup(&self, raw: &str) -> Option<&SurnameRow> {
        self.get(&normalize(raw))
    }

    pub fn rows(&self) -> &[SurnameRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn duplicate_keys(&self) -> usize {
        self.duplicate_keys
    }
}

// ========================================================================================
//                                   First-name side
// ========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FirstNameRow {
    /// First spelling seen in the year file.
    pub name: Box<str>,
    pub female_count: u64,
    pub male_count: u64,
    pub pct_female: f64,
    pub pct_male: f64,
}

impl FirstNameRow {
    pub fn count(&self, sex: Sex) -> u64 {
        match sex {
            Sex::Female => self.female_count,
            Sex::Male => self.male_count,
        }
    }
}

/// All first names recorded for one birth year.
#[derive(Debug, Clone)]
pub struct YearPartition {
    year: i32,
    rows: Vec<FirstNameRow>,
    index: AHashMap<Box<str>, usize>,
}

impl YearPartition {
    fn new(year: i32) -> Self {
        Self {
            year,
            rows: Vec::new(),
            index: AHashMap::new(),
        }
    }

    /// Adds one `(name, sex, count)` source row. Rows for the same normalized name
    /// merge into one record, which is the outer join of the female and male subsets.
    fn add(&mut self, raw_name: &str, sex: Sex, count: u64) {
        let key = normalize(raw_name);
        if key.is_empty() {
            return;
        }
        let position = match self.index.get(key.as_str()) {
            Some(&i) => i,
            None => {
                self.rows.push(FirstNameRow {
                    name: raw_name.trim().into(),
                    female_count: 0,
                    male_count: 0,
                    pct_female: 0.5,
                    pct_male: 0.5,
                });
                self.index.insert(key.into_boxed_str(), self.rows.len() - 1);
                self.rows.len() - 1
            }
        };
        let row = &mut self.rows[position];
        match sex {
            Sex::Female => row.female_count += count,
            Sex::Male => row.male_count += count,
        }
    }

    /// Converts accumulated counts into shares. A zero total yields an even split.
    fn finalize(&mut self) {
        for row in &mut self.rows {
            let total = row.female_count + row.male_count;
            if total == 0 {
                row.pct_female = 0.5;
                row.pct_male = 0.5;
            } else {
                row.pct_female = row.female_count as f64 / total as f64;
                row.pct_male = row.male_count as f64 / total as f64;
            }
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn get(&self, key: &str) -> Option<&FirstNameRow> {
        self.index.get(key).map(|&i| &self.rows[i])
    }

    pub fn rows(&self) -> &[FirstNameRow] {
        &self.rows
    }
}

#[derive(Debug, Clone, Default)]
pub struct FirstNameTable {
    years: BTreeMap<i32, YearPartition>,
}

impl FirstNameTable {
    /// Builds the table from `(year, name, sex, count)` rows. Years are never merged
    /// with each other: `(name, year)` is the key.
    pub fn from_counts<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (i32, &'a str, Sex, u64)>,
    {
        let mut years: BTreeMap<i32, YearPartition> = BTreeMap::new();
        for (year, name, sex, count) in rows {
            years
                .entry(year)
                .or_insert_with(|| YearPartition::new(year))
                .add(name, sex, count);
        }
        for partition in years.values_mut() {
            partition.finalize();
        }
        Self { years }
    }

    /// Reads every `yobYYYY.txt` file in `dir`, in natural file-name order.
    pub fn load(dir: &Path) -> Result<Self, ReferenceError> {
        let io_err = |source| ReferenceError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut year_files: Vec<(String, i32, PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(year) = year_from_file_name(&file_name) else {
                continue;
            };
            year_files.push((file_name, year, entry.path()));
        }
        if year_files.is_empty() {
            return Err(ReferenceError::NoYearFiles(dir.to_path_buf()));
        }
        year_files.sort_by(|a, b| natord::compare(&a.0, &b.0));

        let mut years: BTreeMap<i32, YearPartition> = BTreeMap::new();
        for (_, year, path) in &year_files {
            let partition = years
                .entry(*year)
                .or_insert_with(|| YearPartition::new(*year));
            load_year_file(path, partition)?;
        }
        for partition in years.values_mut() {
            partition.finalize();
        }

        Ok(Self { years })
    }

    pub fn get(&self, key: &str, year: i32) -> Option<&FirstNameRow> {
        self.years.get(&year)?.get(key)
    }

    /// Looks up a raw (not yet normalized) first name.
    pub fn lookup(&self, raw: &str, year: i32) -> Option<&FirstNameRow> {
        self.get(&normalize(raw), year)
    }

    pub fn year(&self, year: i32) -> Option<&YearPartition> {
        self.years.get(&year)
    }

    pub fn years(&self) -> impl Iterator<Item = i32> + '_ {
        self.years.keys().copied()
    }

    /// Number of (name, year) rows across all years.
    pub fn len(&self) -> usize {
        self.years.values().map(|p| p.rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Extracts the birth year encoded in a `yobYYYY.txt` file name.
pub fn year_from_file_name(file_name: &str) -> Option<i32> {
    YEAR_FILE_RE
        .captures(file_name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn load_year_file(path: &Path, partition: &mut YearPartition) -> Result<(), ReferenceError> {
    let df = read_string_frame(path, false)?;
    let columns = df.get_columns();
    if columns.len() < 3 {
        return Err(ReferenceError::TooFewColumns {
            path: path.to_path_buf(),
            found: columns.len(),
        });
    }
    let names = string_values(path, &columns[0])?;
    let sexes = string_values(path, &columns[1])?;
    let counts = string_values(path, &columns[2])?;

    let mut skipped = 0usize;
    for i in 0..df.height() {
        let (Some(name), Some(sex)) = (names[i].as_deref(), sexes[i].as_deref()) else {
            skipped += 1;
            continue;
        };
        let Some(sex) = Sex::from_code(sex) else {
            skipped += 1;
            continue;
        };
        let raw_count = counts[i].as_deref().unwrap_or("");
        let count = raw_count
            .trim()
            .parse::<u64>()
            .map_err(|_| ReferenceError::InvalidCount {
                path: path.to_path_buf(),
                row: i + 1,
                value: raw_count.to_string(),
            })?;
        partition.add(name, sex, count);
    }

    if skipped > 0 {
        warn!(
            "Skipped {skipped} rows without a name or an M/F sex code in '{}'.",
            path.display()
        );
    }
    debug!(
        "Loaded '{}' into year {} ({} names so far).",
        path.display(),
        partition.year,
        partition.rows.len()
    );
    Ok(())
}

/// Reads a CSV file with every column as a string so values survive byte-for-byte.
fn read_string_frame(path: &Path, has_header: bool) -> Result<DataFrame, ReferenceError> {
    let file = File::open(path).map_err(|source| ReferenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    CsvReader::new(file)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(has_header)
                .with_infer_schema_length(Some(0)),
        )
        .finish()
        .map_err(|source| ReferenceError::Polars {
            path: path.to_path_buf(),
            source,
        })
}

fn string_values(path: &Path, column: &Column) -> Result<Vec<Option<String>>, ReferenceError> {
    let polars_err = |source| ReferenceError::Polars {
        path: path.to_path_buf(),
        source,
    };
    let series = column
        .as_materialized_series()
        .cast(&DataType::String)
        .map_err(polars_err)?;
    let values = series
        .str()
        .map_err(polars_err)?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect();
    Ok(values)
}

// ========================================================================================
//                                 The combined handle
// ========================================================================================

/// Summary of a completed build, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceStats {
    pub surname_rows: usize,
    pub duplicate_surname_keys: usize,
    pub years: usize,
    pub first_name_rows: usize,
}

/// Both reference tables. Built once, then only ever read.
#[derive(Debug, Clone)]
pub struct ReferenceTables {
    surnames: SurnameTable,
    first_names: FirstNameTable,
}

impl ReferenceTables {
    /// Loads both sources. Any failure here must stop the process before input is read.
    pub fn build(sources: &ReferenceSources) -> Result<Self, ReferenceError> {
        info!("Loading surname table from '{}'", sources.surnames.display());
        let surnames = SurnameTable::load(&sources.surnames)?;
        info!(
            "Loading first-name tables from '{}'",
            sources.first_names.display()
        );
        let first_names = FirstNameTable::load(&sources.first_names)?;

        let tables = Self::from_parts(surnames, first_names);
        let stats = tables.stats();
        info!(
            "Reference tables ready: {} surnames ({} duplicate keys), {} first-name rows across {} years.",
            stats.surname_rows, stats.duplicate_surname_keys, stats.first_name_rows, stats.years
        );
        Ok(tables)
    }

    pub fn from_parts(surnames: SurnameTable, first_names: FirstNameTable) -> Self {
        Self {
            surnames,
            first_names,
        }
    }

    pub fn surnames(&self) -> &SurnameTable {
        &self.surnames
    }

    pub fn first_names(&self) -> &FirstNameTable {
        &self.first_names
    }

    pub fn stats(&self) -> ReferenceStats {
        ReferenceStats {
            surname_rows: self.surnames.len(),
            duplicate_surname_keys: self.surnames.duplicate_keys(),
            years: self.first_names.years.len(),
            first_name_rows: self.first_names.len(),
        }
    }
}
