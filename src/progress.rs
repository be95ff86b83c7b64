//! Progress reporting
//!
//! Long operations report through a `ProgressSink` instead of touching any
//! presentation state. Sinks run on the caller's thread; a UI on another
//! thread should use `channel_sink` and drain the receiver.

use serde::{Deserialize, Serialize};
use std::sync::mpsc::Sender;

/// Phase of a long-running operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Sanitizing,
    Loading,
    Indexing,
    Resolving,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub phase: Phase,
    /// Completed fraction of the phase, in `[0, 1]`
    pub fraction: f64,
}

impl Progress {
    pub fn new(phase: Phase, fraction: f64) -> Self {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        Self { phase, fraction }
    }
}

pub trait ProgressSink {
    fn report(&mut self, progress: Progress);
}

impl<F: FnMut(Progress)> ProgressSink for F {
    fn report(&mut self, progress: Progress) {
        self(progress)
    }
}

/// Sink that discards everything
pub struct Silent;

impl ProgressSink for Silent {
    fn report(&mut self, _progress: Progress) {}
}

/// Forward progress over a channel. A dropped receiver is ignored so a caller
/// that gave up on the operation does not abort it.
pub fn channel_sink(tx: Sender<Progress>) -> impl ProgressSink {
    move |progress: Progress| {
        let _ = tx.send(progress);
    }
}

/// Keeps reported fractions non-decreasing within a phase
pub(crate) struct Monotonic<'a> {
    sink: &'a mut dyn ProgressSink,
    phase: Phase,
    last: f64,
}

impl<'a> Monotonic<'a> {
    pub(crate) fn new(sink: &'a mut dyn ProgressSink, phase: Phase) -> Self {
        Self { sink, phase, last: 0.0 }
    }

    pub(crate) fn report(&mut self, fraction: f64) {
        let progress = Progress::new(self.phase, fraction);
        if progress.fraction >= self.last {
            self.last = progress.fraction;
        }
        self.sink.report(Progress::new(self.phase, self.last));
    }

    pub(crate) fn finish(&mut self) {
        self.report(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_fraction_is_clamped() {
        assert_eq!(Progress::new(Phase::Loading, 1.7).fraction, 1.0);
        assert_eq!(Progress::new(Phase::Loading, -0.2).fraction, 0.0);
        assert_eq!(Progress::new(Phase::Loading, f64::NAN).fraction, 0.0);
    }

    #[test]
    fn test_monotonic_never_goes_back() {
        let mut seen = Vec::new();
        {
            let mut sink = |p: Progress| seen.push(p.fraction);
            let mut mono = Monotonic::new(&mut sink, Phase::Loading);
            mono.report(0.4);
            mono.report(0.2);
            mono.report(0.6);
            mono.finish();
        }
        assert_eq!(seen, vec![0.4, 0.4, 0.6, 1.0]);
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        let mut sink = channel_sink(tx);
        sink.report(Progress::new(Phase::Indexing, 0.5));
        assert_eq!(rx.recv().unwrap().phase, Phase::Indexing);
        drop(rx);
        sink.report(Progress::new(Phase::Indexing, 1.0));
    }
}
