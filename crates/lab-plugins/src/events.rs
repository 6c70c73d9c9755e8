//! Lifecycle signals

use serde::Serialize;

use lab_core::signal::Signal;
use lab_core::Error;

/// A plugin activation that ended in failure
#[derive(Debug, Clone)]
pub struct ActivationFailure {
    pub plugin: String,
    pub error: Error,
}

/// Plugin lifecycle event, in the order transitions happen
#[derive(Debug, Clone)]
pub enum PluginEvent {
    Registered { plugin: String },
    Activating { plugin: String },
    Activated { plugin: String },
    ActivationFailed(ActivationFailure),
    Deactivated { plugin: String },
    Deregistered { plugin: String },
    AutoStartSettled(StartReport),
}

/// Aggregate outcome of `start()` or `restore_deferred()`
#[derive(Debug, Clone, Default)]
pub struct StartReport {
    /// Requested plugins that are activated, in request order
    pub activated: Vec<String>,
    /// Requested plugins that failed, with the error each one reported
    pub failed: Vec<(String, Error)>,
}

impl StartReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Serializable view with error codes and messages
    pub fn summary(&self) -> StartSummary {
        StartSummary {
            activated: self.activated.clone(),
            failed: self
                .failed
                .iter()
                .map(|(plugin, error)| FailureSummary {
                    plugin: plugin.clone(),
                    code: error.code(),
                    message: error.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartSummary {
    pub activated: Vec<String>,
    pub failed: Vec<FailureSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    pub plugin: String,
    pub code: &'static str,
    pub message: String,
}

/// Every signal a [`PluginHost`](crate::host::PluginHost) emits
#[derive(Debug, Clone)]
pub struct LifecycleSignals {
    pub plugin_registered: Signal<String>,
    pub plugin_activating: Signal<String>,
    pub plugin_activated: Signal<String>,
    pub plugin_activation_failed: Signal<ActivationFailure>,
    pub plugin_deactivated: Signal<String>,
    pub plugin_deregistered: Signal<String>,
    pub all_auto_start_settled: Signal<StartReport>,
    /// Every event above, in one stream
    pub events: Signal<PluginEvent>,
}

impl LifecycleSignals {
    pub fn new(capacity: usize) -> Self {
        Self {
            plugin_registered: Signal::with_capacity("plugin_registered", capacity),
            plugin_activating: Signal::with_capacity("plugin_activating", capacity),
            plugin_activated: Signal::with_capacity("plugin_activated", capacity),
            plugin_activation_failed: Signal::with_capacity("plugin_activation_failed", capacity),
            plugin_deactivated: Signal::with_capacity("plugin_deactivated", capacity),
            plugin_deregistered: Signal::with_capacity("plugin_deregistered", capacity),
            all_auto_start_settled: Signal::with_capacity("all_auto_start_settled", capacity),
            events: Signal::with_capacity("events", capacity),
        }
    }

    /// Route an event to its own signal, then to `events`
    pub(crate) fn emit(&self, event: PluginEvent) {
        match &event {
            PluginEvent::Registered { plugin } => self.plugin_registered.emit(plugin.clone()),
            PluginEvent::Activating { plugin } => self.plugin_activating.emit(plugin.clone()),
            PluginEvent::Activated { plugin } => self.plugin_activated.emit(plugin.clone()),
            PluginEvent::ActivationFailed(failure) => {
                self.plugin_activation_failed.emit(failure.clone())
            }
            PluginEvent::Deactivated { plugin } => self.plugin_deactivated.emit(plugin.clone()),
            PluginEvent::Deregistered { plugin } => self.plugin_deregistered.emit(plugin.clone()),
            PluginEvent::AutoStartSettled(report) => {
                self.all_auto_start_settled.emit(report.clone())
            }
        }
        self.events.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_emit_routes_to_specific_signal_then_stream() {
        let signals = LifecycleSignals::new(8);
        let log = Arc::new(Mutex::new(Vec::new()));

        {
            let log = Arc::clone(&log);
            signals.plugin_activated.connect(move |id| {
                log.lock().unwrap().push(format!("activated:{id}"));
                Ok(())
            });
        }
        {
            let log = Arc::clone(&log);
            signals.events.connect(move |event| {
                log.lock().unwrap().push(format!("event:{event:?}"));
                Ok(())
            });
        }

        signals.emit(PluginEvent::Activated {
            plugin: "a".into(),
        });

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], "activated:a");
        assert!(log[1].starts_with("event:Activated"));
    }

    #[test]
    fn test_report_summary_carries_codes() {
        let report = StartReport {
            activated: vec!["y".into()],
            failed: vec![(
                "x".into(),
                Error::Activation {
                    plugin: "x".into(),
                    message: "boom".into(),
                },
            )],
        };
        assert!(!report.is_success());
        let summary = serde_json::to_value(report.summary()).unwrap();
        assert_eq!(summary["failed"][0]["code"], "ACTIVATION_FAILED");
        assert_eq!(summary["activated"][0], "y");
    }
}
