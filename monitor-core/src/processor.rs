//! Per-event processing steps
//!
//! A [`ProcessorChain`] runs its steps in order on every structured event.
//! Step failures, including panics, become [`StepError`]s that name the step.

use crate::error::StepError;
use crate::types::StructuredEvent;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// One stage of per-event computation
pub trait EventProcessor: Send {
    /// Name used in logs and step errors
    fn name(&self) -> &str;

    /// Called on the worker thread before the first event
    fn start_session(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn process(&mut self, event: &StructuredEvent) -> anyhow::Result<()>;

    /// Called on the worker thread after the last event, whatever ended the loop
    fn end_session(&mut self) {}
}

/// Ordered list of processors invoked once per event
#[derive(Default)]
pub struct ProcessorChain {
    steps: Vec<Box<dyn EventProcessor>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step
    pub fn with(mut self, step: impl EventProcessor + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub(crate) fn start_session(&mut self) -> Result<(), StepError> {
        for step in &mut self.steps {
            let name = step.name().to_string();
            guarded(&name, 0, || step.start_session())?;
        }
        Ok(())
    }

    /// Run every step on `event`, stopping at the first failure
    pub fn process(&mut self, event: &StructuredEvent) -> Result<(), StepError> {
        for step in &mut self.steps {
            let name = step.name().to_string();
            guarded(&name, event.record_id, || step.process(event))?;
        }
        Ok(())
    }

    pub(crate) fn end_session(&mut self) {
        for step in &mut self.steps {
            if panic::catch_unwind(AssertUnwindSafe(|| step.end_session())).is_err() {
                tracing::warn!(step = step.name(), "Processor panicked in end_session");
            }
        }
    }
}

fn guarded<F>(step: &str, record: u64, f: F) -> Result<(), StepError>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    let reason = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => format!("{:#}", e),
        Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
    };
    Err(StepError {
        step: step.to_string(),
        record,
        reason,
    })
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Counts processed events; clones share the count
#[derive(Clone, Debug, Default)]
pub struct EventCounter {
    count: Arc<AtomicU64>,
}

impl EventCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

impl EventProcessor for EventCounter {
    fn name(&self) -> &str {
        "event-counter"
    }

    fn process(&mut self, _event: &StructuredEvent) -> anyhow::Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Logs event throughput every `interval` events
pub struct RateLogger {
    interval: u64,
    seen: u64,
    window_start: Instant,
}

impl RateLogger {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            seen: 0,
            window_start: Instant::now(),
        }
    }
}

impl EventProcessor for RateLogger {
    fn name(&self) -> &str {
        "rate-logger"
    }

    fn start_session(&mut self) -> anyhow::Result<()> {
        self.seen = 0;
        self.window_start = Instant::now();
        Ok(())
    }

    fn process(&mut self, event: &StructuredEvent) -> anyhow::Result<()> {
        self.seen += 1;
        if self.seen % self.interval == 0 {
            let elapsed = self.window_start.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                self.interval as f64 / elapsed
            } else {
                0.0
            };
            info!(
                events = self.seen,
                run = ?event.run,
                rate_hz = rate,
                "Event rate"
            );
            self.window_start = Instant::now();
        }
        Ok(())
    }

    fn end_session(&mut self) {
        info!(events = self.seen, "Processing finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;

    fn event(id: u64) -> StructuredEvent {
        StructuredEvent {
            record_id: id,
            kind: EventKind::Physics,
            run: Some(1),
            detector: Arc::from("det"),
            payload: Vec::new(),
        }
    }

    struct Failing;

    impl EventProcessor for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn process(&mut self, _event: &StructuredEvent) -> anyhow::Result<()> {
            anyhow::bail!("bad cluster")
        }
    }

    struct Panicking;

    impl EventProcessor for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn process(&mut self, _event: &StructuredEvent) -> anyhow::Result<()> {
            panic!("index out of range")
        }
    }

    #[test]
    fn test_steps_run_in_order_until_failure() {
        let first = EventCounter::new();
        let after = EventCounter::new();
        let mut chain = ProcessorChain::new()
            .with(first.clone())
            .with(Failing)
            .with(after.clone());

        assert_eq!(chain.names(), vec!["event-counter", "failing", "event-counter"]);

        let err = chain.process(&event(3)).unwrap_err();
        assert_eq!(err.step, "failing");
        assert_eq!(err.record, 3);
        assert_eq!(err.reason, "bad cluster");
        assert_eq!(first.count(), 1);
        assert_eq!(after.count(), 0);
    }

    #[test]
    fn test_panicking_step_becomes_step_error() {
        let mut chain = ProcessorChain::new().with(Panicking);
        let err = chain.process(&event(9)).unwrap_err();
        assert_eq!(err.step, "panicking");
        assert!(err.reason.contains("index out of range"));
    }

    #[test]
    fn test_rate_logger_counts() {
        let mut logger = RateLogger::new(2);
        logger.start_session().unwrap();
        for id in 1..=5 {
            logger.process(&event(id)).unwrap();
        }
        assert_eq!(logger.seen, 5);
    }
}
