//! Configuration types for profiling scopes

use crate::sink::Finalizer;
use opscope_shared::types::event::DeviceKind;
use std::fmt;
use std::sync::Arc;

/// Default capture capacity per scope
pub const DEFAULT_MAX_EVENTS: usize = 1 << 20;

/// Device categories a scope captures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFilter {
    pub cpu: bool,
    pub accelerator: bool,
}

impl DeviceFilter {
    /// Capture both categories
    pub fn all() -> Self {
        Self {
            cpu: true,
            accelerator: true,
        }
    }

    /// Capture a single category
    pub fn only(device: DeviceKind) -> Self {
        match device {
            DeviceKind::Cpu => Self {
                cpu: true,
                accelerator: false,
            },
            DeviceKind::Accelerator => Self {
                cpu: false,
                accelerator: true,
            },
        }
    }

    pub fn captures(&self, device: DeviceKind) -> bool {
        match device {
            DeviceKind::Cpu => self.cpu,
            DeviceKind::Accelerator => self.accelerator,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.cpu && !self.accelerator
    }
}

impl Default for DeviceFilter {
    /// Both categories on. A host without an accelerator simply produces
    /// no accelerator events; the filter does not need adjusting.
    fn default() -> Self {
        Self::all()
    }
}

/// Scope configuration
///
/// The default captures both device categories without shapes or stacks,
/// holds up to [`DEFAULT_MAX_EVENTS`] events, and runs no finalizer.
#[derive(Clone)]
pub struct Config {
    /// Device categories to capture; events on other categories are
    /// silently skipped, not counted as dropped
    pub devices: DeviceFilter,

    /// Keep input shapes on captured events
    pub capture_shapes: bool,

    /// Keep the enclosing-operator chain on captured events
    pub capture_stack: bool,

    /// Capture buffer capacity; events past this count are dropped and
    /// counted in the sealed set
    pub max_events: usize,

    /// Finalizer run exactly once when the scope seals
    pub on_finalize: Option<Arc<dyn Finalizer>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            devices: DeviceFilter::default(),
            capture_shapes: false,
            capture_stack: false,
            max_events: DEFAULT_MAX_EVENTS,
            on_finalize: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn devices(mut self, devices: DeviceFilter) -> Self {
        self.devices = devices;
        self
    }

    pub fn shapes(mut self, capture: bool) -> Self {
        self.capture_shapes = capture;
        self
    }

    pub fn stack(mut self, capture: bool) -> Self {
        self.capture_stack = capture;
        self
    }

    pub fn max_events(mut self, max: usize) -> Self {
        self.max_events = max;
        self
    }

    pub fn on_finalize(mut self, finalizer: impl Finalizer + 'static) -> Self {
        self.on_finalize = Some(Arc::new(finalizer));
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.devices.is_empty() {
            anyhow::bail!("at least one device category must be captured");
        }
        if self.max_events == 0 {
            anyhow::bail!("max_events must be greater than 0");
        }
        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("devices", &self.devices)
            .field("capture_shapes", &self.capture_shapes)
            .field("capture_stack", &self.capture_stack)
            .field("max_events", &self.max_events)
            .field("on_finalize", &self.on_finalize.as_ref().map(|_| ".."))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.devices.cpu);
        assert!(config.devices.accelerator);
        assert_eq!(config.max_events, DEFAULT_MAX_EVENTS);
    }

    #[test]
    fn test_empty_device_filter_rejected() {
        let config = Config::new().devices(DeviceFilter {
            cpu: false,
            accelerator: false,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = Config::new().max_events(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_chains() {
        let config = Config::new()
            .devices(DeviceFilter::only(DeviceKind::Accelerator))
            .shapes(true)
            .stack(true)
            .max_events(512);

        assert!(!config.devices.captures(DeviceKind::Cpu));
        assert!(config.devices.captures(DeviceKind::Accelerator));
        assert!(config.capture_shapes);
        assert!(config.capture_stack);
        assert_eq!(config.max_events, 512);
    }

    #[test]
    fn test_debug_does_not_print_finalizer() {
        let config = Config::new().on_finalize(
            |_: &opscope_shared::types::event::EventSet| -> anyhow::Result<()> { Ok(()) },
        );
        let debug = format!("{:?}", config);
        assert!(debug.contains("on_finalize"));
    }
}
