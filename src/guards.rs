//! Pre-admission guards.
//!
//! Both guards are cheap and stateless: they run before a permit is
//! requested, so a rejected request never occupies a worker slot.

use std::collections::BTreeSet;
use std::sync::Mutex;

use sysinfo::System;

use crate::error::GateError;

/// Source of the current system memory utilisation in percent (0-100).
pub trait MemoryProbe: Send + Sync {
    fn memory_percent(&self) -> f64;
}

/// Samples the host through `sysinfo` on every call.
pub struct SystemMemoryProbe {
    system: Mutex<System>,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn memory_percent(&self) -> f64 {
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        let used = total.saturating_sub(system.available_memory());
        (used as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// Probe returning a constant, for tests and benchmarks.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemoryProbe(pub f64);

impl MemoryProbe for FixedMemoryProbe {
    fn memory_percent(&self) -> f64 {
        self.0
    }
}

pub struct ResourceGuard {
    threshold: f64,
}

impl ResourceGuard {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Reject when utilisation is strictly above the threshold.
    pub fn check(&self, probe: &dyn MemoryProbe) -> Result<f64, GateError> {
        let percent = probe.memory_percent();
        if percent > self.threshold {
            tracing::info!(
                memory_percent = percent,
                threshold = self.threshold,
                "shedding request under memory pressure"
            );
            return Err(GateError::MemoryPressure {
                percent,
                threshold: self.threshold,
            });
        }
        Ok(percent)
    }
}

#[derive(Debug, Clone)]
pub struct RequestValidator {
    allowed_extensions: BTreeSet<String>,
    max_bytes: usize,
}

impl RequestValidator {
    pub fn new(allowed_extensions: BTreeSet<String>, max_bytes: usize) -> Self {
        Self {
            allowed_extensions,
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn check_extension(&self, filename: &str) -> Result<String, GateError> {
        let extension = extension_of(filename);
        if self.allowed_extensions.contains(&extension) {
            Ok(extension)
        } else {
            tracing::debug!(%filename, %extension, "rejecting unsupported file type");
            Err(GateError::UnsupportedMediaType { extension })
        }
    }

    pub fn check_size(&self, len: usize) -> Result<(), GateError> {
        if len > self.max_bytes {
            return Err(GateError::PayloadTooLarge {
                limit: self.max_bytes,
            });
        }
        Ok(())
    }
}

/// Lower-cased text after the last `.`; empty when there is no dot.
pub fn extension_of(filename: &str) -> String {
    match filename.rfind('.') {
        Some(idx) => filename[idx + 1..].to_ascii_lowercase(),
        None => String::new(),
    }
}
