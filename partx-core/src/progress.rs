use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Split,
    Verify,
    Assemble,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Split => "split",
            Stage::Verify => "verify",
            Stage::Assemble => "assemble",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters are monotonic within a stage. `total` may be an estimate during
/// a split; it is exact in the final update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub stage: Stage,
    pub done: u64,
    pub total: u64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    #[default]
    Continue,
    Stop,
}

/// Observer for split/merge progress. Returning [`Flow::Stop`] cancels the
/// operation at the next row/chunk boundary.
pub trait ProgressSink {
    fn on_progress(&mut self, update: &ProgressUpdate) -> Flow;
}

impl<F> ProgressSink for F
where
    F: FnMut(&ProgressUpdate) -> Flow,
{
    fn on_progress(&mut self, update: &ProgressUpdate) -> Flow {
        self(update)
    }
}

/// Forwards to an optional sink; absent sinks always continue.
pub(crate) struct Reporter<'a> {
    sink: Option<&'a mut dyn ProgressSink>,
    stage: Stage,
}

impl<'a> Reporter<'a> {
    pub(crate) fn new(sink: Option<&'a mut dyn ProgressSink>, stage: Stage) -> Self {
        Self { sink, stage }
    }

    pub(crate) fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    pub(crate) fn report(&mut self, done: u64, total: u64, message: String) -> Flow {
        match self.sink.as_mut() {
            Some(sink) => sink.on_progress(&ProgressUpdate {
                stage: self.stage,
                done,
                total,
                message,
            }),
            None => Flow::Continue,
        }
    }
}
