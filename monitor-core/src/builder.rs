//! Event builders and the registry that resolves them by name
//!
//! A session names its builder with a string identifier. The registry maps
//! identifiers to constructors and is consulted once, when the session is set
//! up, so an unknown name fails the connect instead of the first event.

use crate::config::SessionConfig;
use crate::error::{BuildError, SetupError};
use crate::types::{EventKind, Record, StructuredEvent};
use std::collections::HashMap;
use std::sync::Arc;

/// Converts raw records into structured events
pub trait EventBuilder: Send {
    fn build(&mut self, record: &Record) -> Result<StructuredEvent, BuildError>;
}

/// Constructs a builder for a session
pub type BuilderConstructor = Arc<dyn Fn(&SessionConfig) -> Box<dyn EventBuilder> + Send + Sync>;

/// Maps builder identifiers to constructors
#[derive(Clone, Default)]
pub struct BuilderRegistry {
    constructors: HashMap<String, BuilderConstructor>,
}

impl BuilderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `raw` and `text` builders
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("raw", |config| Box::new(RawEventBuilder::new(config)));
        registry.register("text", |config| Box::new(TextEventBuilder::new(config)));
        registry
    }

    /// Register a constructor, replacing any previous one with the same id
    pub fn register<F>(&mut self, id: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&SessionConfig) -> Box<dyn EventBuilder> + Send + Sync + 'static,
    {
        self.constructors.insert(id.into(), Arc::new(constructor));
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.constructors.contains_key(id)
    }

    /// Registered identifiers in sorted order
    pub fn identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Create the builder named by the session configuration
    pub fn create(&self, config: &SessionConfig) -> Result<Box<dyn EventBuilder>, SetupError> {
        let constructor =
            self.constructors
                .get(&config.event_builder)
                .ok_or_else(|| SetupError::UnknownBuilder {
                    id: config.event_builder.clone(),
                })?;
        Ok(constructor(config))
    }
}

impl std::fmt::Debug for BuilderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderRegistry")
            .field("builders", &self.identifiers())
            .finish()
    }
}

/// Treats every record as a physics event carrying the raw bytes
pub struct RawEventBuilder {
    detector: Arc<str>,
    run: Option<u32>,
}

impl RawEventBuilder {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            detector: Arc::from(config.detector.as_str()),
            run: config.run_number,
        }
    }
}

impl EventBuilder for RawEventBuilder {
    fn build(&mut self, record: &Record) -> Result<StructuredEvent, BuildError> {
        if record.is_empty() {
            return Err(BuildError::new(record.id, "empty record"));
        }
        Ok(StructuredEvent {
            record_id: record.id,
            kind: EventKind::Physics,
            run: self.run,
            detector: Arc::clone(&self.detector),
            payload: record.data.clone(),
        })
    }
}

/// Parses `KIND RUN [PAYLOAD]` text records
///
/// `KIND` is one of `PHYSICS`, `PRESTART` or `END`. A `PRESTART` record
/// switches the run stamped on the events that follow it, unless conditions
/// are frozen to a configured run.
pub struct TextEventBuilder {
    detector: Arc<str>,
    frozen_run: Option<u32>,
    current_run: Option<u32>,
}

impl TextEventBuilder {
    pub fn new(config: &SessionConfig) -> Self {
        let frozen_run = if config.freeze_conditions {
            config.run_number
        } else {
            None
        };
        Self {
            detector: Arc::from(config.detector.as_str()),
            frozen_run,
            current_run: config.run_number,
        }
    }
}

impl EventBuilder for TextEventBuilder {
    fn build(&mut self, record: &Record) -> Result<StructuredEvent, BuildError> {
        let text = std::str::from_utf8(&record.data)
            .map_err(|e| BuildError::new(record.id, format!("not UTF-8: {}", e)))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(BuildError::new(record.id, "empty record"));
        }

        let mut fields = text.splitn(3, char::is_whitespace);
        let kind = match fields.next() {
            Some("PHYSICS") => EventKind::Physics,
            Some("PRESTART") => EventKind::PreStart,
            Some("END") => EventKind::EndRun,
            other => {
                return Err(BuildError::new(
                    record.id,
                    format!("unknown event kind '{}'", other.unwrap_or_default()),
                ))
            }
        };

        let run: u32 = fields
            .next()
            .ok_or_else(|| BuildError::new(record.id, "missing run number"))?
            .parse()
            .map_err(|e| BuildError::new(record.id, format!("bad run number: {}", e)))?;

        if kind == EventKind::PreStart {
            self.current_run = Some(run);
        }

        let run = self.frozen_run.or(self.current_run).or(Some(run));
        let payload = fields.next().unwrap_or("").trim_start().as_bytes().to_vec();

        Ok(StructuredEvent {
            record_id: record.id,
            kind,
            run,
            detector: Arc::clone(&self.detector),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataSource;
    use std::path::PathBuf;

    fn config(builder: &str) -> SessionConfig {
        let mut config = SessionConfig::new(
            DataSource::LcioFile {
                path: PathBuf::from("recon.slcio"),
            },
            "HPS-EngRun2015-Nominal-v3",
        );
        config.event_builder = builder.to_string();
        config
    }

    #[test]
    fn test_unknown_builder() {
        let registry = BuilderRegistry::with_defaults();
        let result = registry.create(&config("org.hps.evio.LCSimEngRunEventBuilder"));
        assert!(matches!(
            result,
            Err(SetupError::UnknownBuilder { id }) if id == "org.hps.evio.LCSimEngRunEventBuilder"
        ));
    }

    #[test]
    fn test_default_identifiers() {
        let registry = BuilderRegistry::with_defaults();
        assert_eq!(registry.identifiers(), vec!["raw", "text"]);
        assert!(registry.contains("raw"));
        assert!(!BuilderRegistry::new().contains("raw"));
    }

    #[test]
    fn test_raw_builder_rejects_empty_record() {
        let mut builder = BuilderRegistry::with_defaults().create(&config("raw")).unwrap();
        let err = builder.build(&Record::new(7, Vec::new())).unwrap_err();
        assert_eq!(err.record, 7);

        let event = builder.build(&Record::new(8, "abc")).unwrap();
        assert_eq!(event.kind, EventKind::Physics);
        assert_eq!(&*event.detector, "HPS-EngRun2015-Nominal-v3");
    }

    #[test]
    fn test_text_builder_parses_kinds() {
        let mut builder = TextEventBuilder::new(&config("text"));

        let prestart = builder.build(&Record::new(1, "PRESTART 5772")).unwrap();
        assert_eq!(prestart.kind, EventKind::PreStart);
        assert_eq!(prestart.run, Some(5772));

        let physics = builder.build(&Record::new(2, "PHYSICS 5772 hits=12")).unwrap();
        assert_eq!(physics.payload, b"hits=12");
        assert_eq!(physics.run, Some(5772));

        assert!(builder.build(&Record::new(3, "END 5772")).unwrap().is_end_of_run());
    }

    #[test]
    fn test_text_builder_errors_carry_record_id() {
        let mut builder = TextEventBuilder::new(&config("text"));
        assert_eq!(builder.build(&Record::new(4, "GARBAGE 1")).unwrap_err().record, 4);
        assert_eq!(builder.build(&Record::new(5, "PHYSICS x")).unwrap_err().record, 5);
        assert_eq!(builder.build(&Record::new(6, "PHYSICS")).unwrap_err().record, 6);
    }

    #[test]
    fn test_text_builder_frozen_run() {
        let mut cfg = config("text");
        cfg.run_number = Some(1000);
        cfg.freeze_conditions = true;
        let mut builder = TextEventBuilder::new(&cfg);

        let prestart = builder.build(&Record::new(1, "PRESTART 5772")).unwrap();
        assert_eq!(prestart.run, Some(1000));
        let event = builder.build(&Record::new(2, "PHYSICS 5772")).unwrap();
        assert_eq!(event.run, Some(1000));
    }

    #[test]
    fn test_text_builder_prestart_sets_run_for_following_events() {
        let mut builder = TextEventBuilder::new(&config("text"));

        let before = builder.build(&Record::new(1, "PHYSICS 5771")).unwrap();
        assert_eq!(before.run, Some(5771));

        builder.build(&Record::new(2, "PRESTART 5772")).unwrap();
        let after = builder.build(&Record::new(3, "PHYSICS 5771 stale")).unwrap();
        assert_eq!(after.run, Some(5772));
    }

    #[test]
    fn test_text_builder_empty_record() {
        let mut builder = TextEventBuilder::new(&config("text"));
        for blank in ["", "   \n"] {
            let err = builder.build(&Record::new(9, blank)).unwrap_err();
            assert_eq!(err.record, 9);
            assert!(err.to_string().contains("empty record"), "{}", err);
        }
    }
}
