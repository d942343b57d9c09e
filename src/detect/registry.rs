use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;
use crate::detect::result::{Candidate, Region};

use super::backend::PlateDetector;
use super::backends::{ProcessDetector, StubDetector};

type DetectorFactory =
    Box<dyn Fn(&DetectorSettings) -> Result<Box<dyn PlateDetector>> + Send + Sync>;

/// Registry of detector factories.
///
/// Every camera session owns its detector, so the registry stores constructors
/// rather than shared instances.
pub struct DetectorRegistry {
    factories: HashMap<String, DetectorFactory>,
    default_name: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with the `stub` and `process` backends. `stub` is the default.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("stub", |settings| {
            let candidates = settings
                .stub_plates
                .iter()
                .map(|plate| Candidate::new(plate.clone(), Region::new(0.0, 0.0, 100.0, 20.0)))
                .collect();
            Ok(Box::new(StubDetector::fixed(candidates)))
        });
        registry.register("process", |settings| {
            let command = settings
                .command
                .clone()
                .ok_or_else(|| anyhow!("process detector requires detector.command"))?;
            let detector = ProcessDetector::new(command, settings.args.clone())?
                .with_timeout(Duration::from_millis(settings.timeout_ms));
            Ok(Box::new(detector))
        });
        registry
    }

    /// Register a factory. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&DetectorSettings) -> Result<Box<dyn PlateDetector>> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("detector backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Build a fresh detector by backend name.
    pub fn create(
        &self,
        name: &str,
        settings: &DetectorSettings,
    ) -> Result<Box<dyn PlateDetector>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("detector backend '{}' not registered", name))?;
        factory(settings)
    }

    /// Build the backend named in `settings`, falling back to the default.
    pub fn create_configured(
        &self,
        settings: &DetectorSettings,
    ) -> Result<Box<dyn PlateDetector>> {
        let name = if settings.backend.trim().is_empty() {
            self.default_name
                .clone()
                .ok_or_else(|| anyhow!("no detector backends registered"))?
        } else {
            settings.backend.clone()
        };
        self.create(&name, settings)
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    #[test]
    fn builtin_registry_lists_backends() {
        let registry = DetectorRegistry::with_builtin();
        assert_eq!(registry.list(), vec!["process", "stub"]);
    }

    #[test]
    fn stub_factory_uses_configured_plates() -> Result<()> {
        let registry = DetectorRegistry::with_builtin();
        let settings = DetectorSettings {
            backend: "stub".to_string(),
            stub_plates: vec!["A123BC45".to_string()],
            ..DetectorSettings::default()
        };
        let mut detector = registry.create_configured(&settings)?;
        let frame = Frame::new(vec![0u8; 3], 1, 1, 3)?;
        let candidates = detector.detect(&frame)?;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].text, "A123BC45");
        Ok(())
    }

    #[test]
    fn process_factory_requires_command() {
        let registry = DetectorRegistry::with_builtin();
        let settings = DetectorSettings {
            backend: "process".to_string(),
            ..DetectorSettings::default()
        };
        assert!(registry.create_configured(&settings).is_err());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut registry = DetectorRegistry::with_builtin();
        assert!(registry.set_default("onnx").is_err());
        assert!(registry
            .create("onnx", &DetectorSettings::default())
            .is_err());
    }
}
