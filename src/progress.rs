use std::fmt;

/// Stages reported while imputing a stream of records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImputeProgressStage {
    Batches,
}

impl ImputeProgressStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Batches => "record imputation",
        }
    }
}

impl fmt::Display for ImputeProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting incremental progress while imputing. The total number of
/// records is unknown up front because the input is streamed.
pub trait ImputeProgressObserver {
    fn on_stage_start(&mut self, stage: ImputeProgressStage) {
        let _ = stage;
    }
    fn on_stage_advance(&mut self, stage: ImputeProgressStage, processed_records: u64) {
        let _ = (stage, processed_records);
    }
    fn on_stage_finish(&mut self, stage: ImputeProgressStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopProgress;

impl ImputeProgressObserver for NoopProgress {}
