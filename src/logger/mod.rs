pub mod console_sink;
pub mod memory_sink;
pub mod types;

pub use self::console_sink::ConsoleStatusSink;
pub use self::memory_sink::MemoryStatusSink;
pub use self::types::{StatusEvent, StatusSink};

use crate::config::LoggingConfig;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Events kept by the configured `"memory"` sink.
const MEMORY_SINK_CAPACITY: usize = 1000;

/// Fans status events out to every configured sink.
///
/// Delivery is synchronous: a run is a short-lived process and the last
/// events (the shard summary) must not be lost on exit.
pub struct StatusLogger {
    sinks: Vec<Box<dyn StatusSink>>,
    memory: Option<Arc<RwLock<VecDeque<StatusEvent>>>>,
}

impl StatusLogger {
    pub fn new(
        config: &LoggingConfig,
        ratio_base: u32,
        extra_sinks: Vec<Box<dyn StatusSink>>,
    ) -> Arc<Self> {
        let mut sinks: Vec<Box<dyn StatusSink>> = Vec::new();
        let mut memory = None;

        for sink_type in &config.events {
            match sink_type.as_str() {
                "console" => {
                    sinks.push(Box::new(ConsoleStatusSink::new(config.clone(), ratio_base)))
                }
                "memory" if memory.is_none() => {
                    let sink = MemoryStatusSink::new(MEMORY_SINK_CAPACITY);
                    memory = Some(sink.clone_buffer());
                    sinks.push(Box::new(sink));
                }
                "memory" => {}
                other => warn!("Unknown status sink type: {}", other),
            }
        }
        sinks.extend(extra_sinks);

        Arc::new(Self { sinks, memory })
    }

    /// A logger that delivers only to the given sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn StatusSink>>) -> Arc<Self> {
        Arc::new(Self {
            sinks,
            memory: None,
        })
    }

    /// Events held by the configured memory sink, oldest first. Empty when
    /// no memory sink is configured.
    pub fn recent(&self) -> Vec<StatusEvent> {
        let Some(buffer) = &self.memory else {
            return Vec::new();
        };
        match buffer.read() {
            Ok(events) => events.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn silent() -> Arc<Self> {
        Self::with_sinks(Vec::new())
    }

    pub fn emit(&self, event: StatusEvent) {
        for sink in &self.sinks {
            sink.emit(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_out_reaches_extra_sinks() {
        let memory = MemoryStatusSink::new(10);
        let buffer = memory.clone_buffer();
        let config = LoggingConfig {
            events: vec!["console".to_string(), "bogus".to_string()],
            ..LoggingConfig::default()
        };
        let logger = StatusLogger::new(&config, 4, vec![Box::new(memory)]);

        logger.emit(StatusEvent::Merged { rules: 42 });

        let events = buffer.read().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], StatusEvent::Merged { rules: 42 });
    }

    #[test]
    fn test_memory_sink_from_config_keeps_events() {
        let config = LoggingConfig {
            events: vec!["memory".to_string(), "memory".to_string()],
            ..LoggingConfig::default()
        };
        let logger = StatusLogger::new(&config, 4, Vec::new());

        logger.emit(StatusEvent::Merged { rules: 7 });
        logger.emit(StatusEvent::PartWritten { part: 1, rules: 7 });

        assert_eq!(
            logger.recent(),
            vec![
                StatusEvent::Merged { rules: 7 },
                StatusEvent::PartWritten { part: 1, rules: 7 }
            ]
        );
    }

    #[test]
    fn test_recent_is_empty_without_memory_sink() {
        let logger = StatusLogger::new(&LoggingConfig::default(), 4, Vec::new());
        logger.emit(StatusEvent::Merged { rules: 1 });
        assert!(logger.recent().is_empty());
    }
}
