#[derive(Debug, Clone)]
pub enum Progress {
    PhaseStart { name: &'static str },
    PhaseFinish,

    TaskStart { total_steps: u64 },
    TaskIncrement,
    TaskFinish,

    /// End of one outer ARMC iteration, after phi has been recalibrated.
    BlockFinished {
        iteration: usize,
        blocks: usize,
        acceptance_rate: f64,
        phi: f64,
    },
    Message(String),
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn reporter_without_callback_ignores_events() {
        ProgressReporter::new().report(Progress::PhaseFinish);
    }

    #[test]
    fn reporter_forwards_events_to_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = ProgressReporter::with_callback(Box::new(move |event| {
            if let Progress::Message(text) = event {
                sink.lock().unwrap().push(text);
            }
        }));
        reporter.report(Progress::Message("hello".to_string()));
        reporter.report(Progress::TaskIncrement);
        assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
    }
}
