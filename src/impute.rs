// ========================================================================================
//
//                              THE IMPUTATION PIPELINE
//
// ========================================================================================
//
// Streams input records through the reference tables in bounded batches. Each batch
// is split into complete and bad records; complete records are keyed through the
// normalizer, joined against the surname table and the year-partitioned first-name
// table, and written out with their probability fields appended. Bad records (no
// first or no last name) bypass the joins and go to their own stream untouched.
//
// Batch boundaries only bound memory. Output is identical for every batch size.

use crate::dates::{DEFAULT_BIRTH_YEAR, birth_year_or};
use crate::normalize::normalize;
use crate::progress::{ImputeProgressObserver, ImputeProgressStage};
use crate::reference::{FirstNameRow, ReferenceTables, SurnameRow};
use crate::types::{FIRST_NAME_PROBABILITY_COLUMNS, LAST_NAME_PROBABILITY_COLUMNS};
use csv::StringRecord;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use thiserror::Error;

/// Records per batch unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// What an unmatched name receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// Equal odds: `1/6` per race/ethnicity field, `0.5` per gender field.
    #[default]
    Uniform,
    /// An unnormalized miss flag: `1` in every field.
    MissFlag,
}

impl FallbackPolicy {
    pub fn last_name_value(self) -> f64 {
        match self {
            Self::Uniform => 1.0 / LAST_NAME_PROBABILITY_COLUMNS.len() as f64,
            Self::MissFlag => 1.0,
        }
    }

    pub fn first_name_value(self) -> f64 {
        match self {
            Self::Uniform => 1.0 / FIRST_NAME_PROBABILITY_COLUMNS.len() as f64,
            Self::MissFlag => 1.0,
        }
    }
}

impl fmt::Display for FallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uniform => f.write_str("uniform"),
            Self::MissFlag => f.write_str("miss-flag"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImputeOptions {
    pub first_name_column: String,
    pub last_name_column: String,
    pub dob_column: String,
    pub batch_size: usize,
    pub fallback: FallbackPolicy,
    pub default_birth_year: i32,
}

impl Default for ImputeOptions {
    fn default() -> Self {
        Self {
            first_name_column: "applicant_first_name".to_string(),
            last_name_column: "applicant_last_name".to_string(),
            dob_column: "applicant_dob".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            fallback: FallbackPolicy::default(),
            default_birth_year: DEFAULT_BIRTH_YEAR,
        }
    }
}

#[derive(Error, Debug)]
pub enum ImputeError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(
        "The required column '{column}' was not found in the input header. Available columns: {available}"
    )]
    ColumnNotFound { column: String, available: String },
}

/// Where the consumed columns sit in the input, and which columns pass through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    pub first_name: usize,
    pub last_name: usize,
    pub dob: Option<usize>,
    pub kept: Vec<usize>,
}

impl ColumnLayout {
    pub fn resolve(headers: &StringRecord, options: &ImputeOptions) -> Result<Self, ImputeError> {
        let position = |name: &str| headers.iter().position(|h| h == name);
        let required = |name: &str| {
            position(name).ok_or_else(|| ImputeError::ColumnNotFound {
                column: name.to_string(),
                available: headers.iter().collect::<Vec<_>>().join(", "),
            })
        };

        let first_name = required(&options.first_name_column)?;
        let last_name = required(&options.last_name_column)?;
        let dob = position(&options.dob_column);

        let kept = (0..headers.len())
            .filter(|&i| i != first_name && i != last_name && Some(i) != dob)
            .collect();

        Ok(Self {
            first_name,
            last_name,
            dob,
            kept,
        })
    }

    /// Remaining input columns, then the race/ethnicity columns, then the gender columns.
    pub fn output_header(&self, headers: &StringRecord) -> StringRecord {
        let mut out = StringRecord::with_capacity(0, self.output_width());
        for &i in &self.kept {
            out.push_field(headers.get(i).unwrap_or(""));
        }
        for column in LAST_NAME_PROBABILITY_COLUMNS
            .iter()
            .chain(FIRST_NAME_PROBABILITY_COLUMNS.iter())
        {
            out.push_field(column);
        }
        out
    }

    fn output_width(&self) -> usize {
        self.kept.len() + LAST_NAME_PROBABILITY_COLUMNS.len() + FIRST_NAME_PROBABILITY_COLUMNS.len()
    }
}

/// Outcome of a surname lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurnameMatch<'t> {
    Found(&'t SurnameRow),
    Fallback,
}

/// Outcome of a (first name, birth year) lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FirstNameMatch<'t> {
    Found(&'t FirstNameRow),
    Fallback,
}

/// Result of processing one batch, in input order.
#[derive(Debug, Default)]
pub struct BatchOutput {
    pub imputed: Vec<StringRecord>,
    pub bad: Vec<StringRecord>,
    pub surname_matches: u64,
    pub first_name_matches: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImputeSummary {
    pub batches: u64,
    pub records_read: u64,
    pub imputed: u64,
    pub bad: u64,
    pub surname_matches: u64,
    pub first_name_matches: u64,
}

/// Joins records against a shared, read-only set of reference tables.
pub struct Imputer<'t> {
    tables: &'t ReferenceTables,
    options: ImputeOptions,
    last_name_fallback: String,
    first_name_fallback: String,
}

impl<'t> Imputer<'t> {
    pub fn new(tables: &'t ReferenceTables, options: ImputeOptions) -> Self {
        let mut buffer = ryu::Buffer::new();
        let last_name_fallback = buffer.format(options.fallback.last_name_value()).to_string();
        let first_name_fallback = buffer.format(options.fallback.first_name_value()).to_string();
        Self {
            tables,
            options,
            last_name_fallback,
            first_name_fallback,
        }
    }

    pub fn options(&self) -> &ImputeOptions {
        &self.options
    }

    pub fn last_name(&self, raw: &str) -> SurnameMatch<'t> {
        match self.tables.surnames().get(&normalize(raw)) {
            Some(row) => SurnameMatch::Found(row),
            None => SurnameMatch::Fallback,
        }
    }

    pub fn first_name(&self, raw: &str, dob: Option<&str>) -> FirstNameMatch<'t> {
        let year = birth_year_or(dob, self.options.default_birth_year);
        match self.tables.first_names().get(&normalize(raw), year) {
            Some(row) => FirstNameMatch::Found(row),
            None => FirstNameMatch::Fallback,
        }
    }

    /// Imputes one batch. Records missing a first or last name land in `bad` unchanged.
    pub fn process_batch(&self, layout: &ColumnLayout, records: &[StringRecord]) -> BatchOutput {
        let mut out = BatchOutput::default();
        let mut buffer = ryu::Buffer::new();

        for record in records {
            let present = |i: usize| record.get(i).filter(|v| !v.trim().is_empty());
            let (Some(first), Some(last)) = (present(layout.first_name), present(layout.last_name))
            else {
                out.bad.push(record.clone());
                continue;
            };
            let dob = layout.dob.and_then(|i| record.get(i));

            let mut row = StringRecord::with_capacity(record.as_slice().len(), layout.output_width());
            for &i in &layout.kept {
                row.push_field(record.get(i).unwrap_or(""));
            }

            match self.last_name(last) {
                SurnameMatch::Found(surname) => {
                    out.surname_matches += 1;
                    for pct in &surname.percentages {
                        row.push_field(pct.raw());
                    }
                }
                SurnameMatch::Fallback => {
                    for _ in LAST_NAME_PROBABILITY_COLUMNS {
                        row.push_field(&self.last_name_fallback);
                    }
                }
            }

            match self.first_name(first, dob) {
                FirstNameMatch::Found(given) => {
                    out.first_name_matches += 1;
                    row.push_field(buffer.format(given.pct_female));
                    row.push_field(buffer.format(given.pct_male));
                }
                FirstNameMatch::Fallback => {
                    for _ in FIRST_NAME_PROBABILITY_COLUMNS {
                        row.push_field(&self.first_name_fallback);
                    }
                }
            }

            out.imputed.push(row);
        }

        out
    }

    /// Streams every record of `input` to `output`, `batch_size` records at a time.
    /// Each output stream gets exactly one header, even when the input has no rows.
    pub fn run<R, W, B>(
        &self,
        input: csv::Reader<R>,
        output: &mut csv::Writer<W>,
        bad_output: Option<&mut csv::Writer<B>>,
        progress: &mut dyn ImputeProgressObserver,
    ) -> Result<ImputeSummary, ImputeError>
    where
        R: Read,
        W: Write,
        B: Write,
    {
        let mut input = input;
        let headers = input.headers()?.clone();
        let layout = ColumnLayout::resolve(&headers, &self.options)?;
        if layout.dob.is_none() {
            warn!(
                "Birth-date column '{}' not found; every record uses birth year {}.",
                self.options.dob_column, self.options.default_birth_year
            );
        }

        let mut main_sink = HeaderOnce::new(output, layout.output_header(&headers));
        let mut bad_sink = bad_output.map(|writer| HeaderOnce::new(writer, headers.clone()));

        let batch_size = self.options.batch_size.max(1);
        let mut summary = ImputeSummary::default();
        let mut batch: Vec<StringRecord> = Vec::with_capacity(batch_size);
        let mut records = input.into_records();

        progress.on_stage_start(ImputeProgressStage::Batches);
        loop {
            batch.clear();
            for record in records.by_ref().take(batch_size) {
                batch.push(record?);
            }
            if batch.is_empty() {
                break;
            }

            let out = self.process_batch(&layout, &batch);
            main_sink.write_batch(&out.imputed)?;
            if let Some(sink) = bad_sink.as_mut() {
                sink.write_batch(&out.bad)?;
            }

            summary.batches += 1;
            summary.records_read += batch.len() as u64;
            summary.imputed += out.imputed.len() as u64;
            summary.bad += out.bad.len() as u64;
            summary.surname_matches += out.surname_matches;
            summary.first_name_matches += out.first_name_matches;
            debug!(
                "Batch {}: {} imputed, {} bad.",
                summary.batches,
                out.imputed.len(),
                out.bad.len()
            );
            progress.on_stage_advance(ImputeProgressStage::Batches, summary.records_read);
        }

        main_sink.finish()?;
        if let Some(sink) = bad_sink.as_mut() {
            sink.finish()?;
        } else if summary.bad > 0 {
            warn!(
                "{} records lacked a first or last name and were dropped (no bad-record output configured).",
                summary.bad
            );
        }
        progress.on_stage_finish(ImputeProgressStage::Batches);

        info!(
            "Imputed {} of {} records ({} surname matches, {} first-name matches, {} bad).",
            summary.imputed,
            summary.records_read,
            summary.surname_matches,
            summary.first_name_matches,
            summary.bad
        );
        Ok(summary)
    }
}

/// A CSV output stream whose header goes out with the first batch and never again.
struct HeaderOnce<'w, W: Write> {
    writer: &'w mut csv::Writer<W>,
    header: StringRecord,
    header_written: bool,
}

impl<'w, W: Write> HeaderOnce<'w, W> {
    fn new(writer: &'w mut csv::Writer<W>, header: StringRecord) -> Self {
        Self {
            writer,
            header,
            header_written: false,
        }
    }

    fn write_header_if_needed(&mut self) -> Result<(), csv::Error> {
        if !self.header_written {
            self.writer.write_record(&self.header)?;
            self.header_written = true;
        }
        Ok(())
    }

    fn write_batch(&mut self, rows: &[StringRecord]) -> Result<(), csv::Error> {
        self.write_header_if_needed()?;
        for row in rows {
            self.writer.write_record(row)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ImputeError> {
        self.write_header_if_needed()?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use crate::reference::{FirstNameTable, Percentage, SurnameTable};
    use crate::types::Sex;
    use approx::assert_abs_diff_eq;

    const HEADER: &str = "id,applicant_first_name,applicant_last_name,applicant_dob,state";

    fn surname(name: &str, pcts: [&str; 6]) -> SurnameRow {
        SurnameRow {
            name: name.into(),
            count: Some(1000.0),
            percentages: pcts.map(Percentage::new),
        }
    }

    fn fixture_tables() -> ReferenceTables {
        let surnames = SurnameTable::from_rows(vec![
            surname("OBRIEN", ["86.37", "5.97", "0.52", "0.37", "1.72", "5.05"]),
            surname("GARCIA", ["5.38", "0.45", "1.41", "0.47", "0.26", "92.03"]),
        ]);
        let first_names = FirstNameTable::from_counts(vec![
            (1985, "Mary", Sex::Female, 300),
            (1985, "Mary", Sex::Male, 100),
            (1950, "Leslie", Sex::Female, 10),
            (1950, "Leslie", Sex::Male, 90),
            (1990, "Leslie", Sex::Female, 90),
            (1990, "Leslie", Sex::Male, 10),
        ]);
        ReferenceTables::from_parts(surnames, first_names)
    }

    fn run_to_strings(
        tables: &ReferenceTables,
        options: ImputeOptions,
        input: &str,
    ) -> (String, String, ImputeSummary) {
        let imputer = Imputer::new(tables, options);
        let reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(input.as_bytes());
        let mut output = csv::Writer::from_writer(Vec::new());
        let mut bad = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(Vec::new());
        let summary = imputer
            .run(reader, &mut output, Some(&mut bad), &mut NoopProgress)
            .unwrap();
        let output = String::from_utf8(output.into_inner().unwrap()).unwrap();
        let bad = String::from_utf8(bad.into_inner().unwrap()).unwrap();
        (output, bad, summary)
    }

    #[test]
    fn end_to_end_row_has_columns_in_order() {
        let tables = fixture_tables();
        let input = format!("{HEADER}\n1,Mary,O'Brien,1985-06-01,NY\n");
        let (output, bad, summary) = run_to_strings(&tables, ImputeOptions::default(), &input);

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            lines,
            vec![
                "id,state,pctwhite,pctblack,pctapi,pctaian,pct2prace,pcthispanic,pctfemale,pctmale",
                "1,NY,86.37,5.97,0.52,0.37,1.72,5.05,0.75,0.25",
            ]
        );
        assert_eq!(bad.lines().collect::<Vec<_>>(), vec![HEADER]);
        assert_eq!(summary.surname_matches, 1);
        assert_eq!(summary.first_name_matches, 1);
    }

    #[test]
    fn unmatched_names_get_the_uniform_fallback() {
        let tables = fixture_tables();
        let input = format!("{HEADER}\n7,Zebulon,Nosuchname,,WA\n");
        let (output, _, _) = run_to_strings(&tables, ImputeOptions::default(), &input);
        let row = output.lines().nth(1).unwrap();
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields.len(), 10);
        for field in &fields[2..8] {
            assert_abs_diff_eq!(field.parse::<f64>().unwrap(), 1.0 / 6.0, epsilon = 1e-12);
        }
        assert_eq!(&fields[8..], &["0.5", "0.5"]);
    }

    #[test]
    fn miss_flag_policy_writes_ones() {
        let tables = fixture_tables();
        let options = ImputeOptions {
            fallback: FallbackPolicy::MissFlag,
            ..ImputeOptions::default()
        };
        let input = format!("{HEADER}\n7,Zebulon,Nosuchname,,WA\n");
        let (output, _, _) = run_to_strings(&tables, options, &input);
        assert_eq!(
            output.lines().nth(1).unwrap(),
            "7,WA,1.0,1.0,1.0,1.0,1.0,1.0,1.0,1.0"
        );
    }

    #[test]
    fn fallback_is_deterministic_across_runs() {
        let tables = fixture_tables();
        let input = format!("{HEADER}\n1,Ann,Unknownson,1970-01-01,CA\n");
        let first = run_to_strings(&tables, ImputeOptions::default(), &input).0;
        let second = run_to_strings(&tables, ImputeOptions::default(), &input).0;
        assert_eq!(first, second);
    }

    #[test]
    fn first_name_lookup_respects_birth_year() {
        let tables = fixture_tables();
        let imputer = Imputer::new(&tables, ImputeOptions::default());
        let (FirstNameMatch::Found(old), FirstNameMatch::Found(young)) = (
            imputer.first_name("Leslie", Some("1950-03-03")),
            imputer.first_name("LESLIE", Some("12/24/1990")),
        ) else {
            panic!("Leslie should match in both years");
        };
        assert_abs_diff_eq!(old.pct_female, 0.1);
        assert_abs_diff_eq!(young.pct_female, 0.9);

        // Unreadable dates use 1990.
        match imputer.first_name("Leslie", Some("sometime")) {
            FirstNameMatch::Found(row) => assert_abs_diff_eq!(row.pct_female, 0.9),
            FirstNameMatch::Fallback => panic!("default year should be 1990"),
        }
        assert_eq!(imputer.first_name("Leslie", Some("1970")), FirstNameMatch::Fallback);
    }

    #[test]
    fn bad_records_are_routed_unchanged() {
        let tables = fixture_tables();
        let input = format!(
            "{HEADER}\n1,Mary,,1985-06-01,NY\n2,,Garcia,1985-06-01,TX\n3,Mary,Garcia,1985-06-01,FL\n4,Mary\n"
        );
        let (output, bad, summary) = run_to_strings(&tables, ImputeOptions::default(), &input);

        let main_rows: Vec<&str> = output.lines().skip(1).collect();
        assert_eq!(main_rows.len(), 1);
        assert!(main_rows[0].starts_with("3,FL,5.38,"));

        assert_eq!(
            bad.lines().collect::<Vec<_>>(),
            vec![
                HEADER,
                "1,Mary,,1985-06-01,NY",
                "2,,Garcia,1985-06-01,TX",
                "4,Mary",
            ]
        );
        assert_eq!(summary.bad, 3);
        assert_eq!(summary.imputed, 1);
        assert_eq!(summary.records_read, 4);
    }

    #[test]
    fn every_complete_record_gets_a_vector() {
        let tables = fixture_tables();
        let mut input = String::from(HEADER);
        for i in 0..25 {
            input.push_str(&format!("\n{i},Name{i},Surname{i},,XX"));
        }
        let (output, _, summary) = run_to_strings(&tables, ImputeOptions::default(), &input);
        assert_eq!(summary.imputed, 25);
        for line in output.lines().skip(1) {
            assert_eq!(line.split(',').count(), 10);
        }
    }

    #[test]
    fn multi_batch_output_matches_single_batch_with_one_header() {
        let tables = fixture_tables();
        let mut input = String::from(HEADER);
        for i in 0..23 {
            let last = if i % 5 == 0 { "" } else { "Garcia" };
            input.push_str(&format!("\n{i},Mary,{last},1985-01-01,ST"));
        }

        let single = run_to_strings(&tables, ImputeOptions::default(), &input);
        let chunked_options = ImputeOptions {
            batch_size: 4,
            ..ImputeOptions::default()
        };
        let chunked = run_to_strings(&tables, chunked_options, &input);

        assert_eq!(single.0, chunked.0);
        assert_eq!(single.1, chunked.1);
        assert_eq!(chunked.2.batches, 6);
        assert_eq!(single.2.batches, 1);
        assert_eq!(chunked.0.matches("pctwhite").count(), 1);
        assert_eq!(chunked.1.matches("applicant_last_name").count(), 1);
    }

    #[test]
    fn empty_input_still_writes_headers() {
        let tables = fixture_tables();
        let (output, bad, summary) = run_to_strings(&tables, ImputeOptions::default(), HEADER);
        assert_eq!(output.lines().count(), 1);
        assert_eq!(bad.lines().count(), 1);
        assert_eq!(summary.batches, 0);
    }

    #[test]
    fn missing_name_column_is_fatal() {
        let tables = fixture_tables();
        let imputer = Imputer::new(&tables, ImputeOptions::default());
        let reader = csv::Reader::from_reader("id,first,last\n1,a,b\n".as_bytes());
        let mut output = csv::Writer::from_writer(Vec::new());
        let err = imputer
            .run(reader, &mut output, None::<&mut csv::Writer<Vec<u8>>>, &mut NoopProgress)
            .unwrap_err();
        match err {
            ImputeError::ColumnNotFound { column, available } => {
                assert_eq!(column, "applicant_first_name");
                assert_eq!(available, "id, first, last");
            }
            other => panic!("Expected ColumnNotFound, got {other:?}"),
        }
    }

    #[test]
    fn missing_dob_column_uses_default_year() {
        let tables = fixture_tables();
        let input = "applicant_first_name,applicant_last_name\nLeslie,Garcia\n";
        let (output, _, _) = run_to_strings(&tables, ImputeOptions::default(), input);
        assert_eq!(
            output.lines().nth(1).unwrap(),
            "5.38,0.45,1.41,0.47,0.26,92.03,0.9,0.1"
        );
    }

    #[test]
    fn custom_column_names_are_honoured() {
        let tables = fixture_tables();
        let options = ImputeOptions {
            first_name_column: "given".to_string(),
            last_name_column: "family".to_string(),
            dob_column: "born".to_string(),
            ..ImputeOptions::default()
        };
        let input = "family,x,given,born\nO'Brien,keep,Mary,1985\n";
        let (output, _, _) = run_to_strings(&tables, options, input);
        assert_eq!(
            output.lines().collect::<Vec<_>>(),
            vec![
                "x,pctwhite,pctblack,pctapi,pctaian,pct2prace,pcthispanic,pctfemale,pctmale",
                "keep,86.37,5.97,0.52,0.37,1.72,5.05,0.75,0.25",
            ]
        );
    }
}
