use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use crate::aggregate::VotingSettings;
use crate::ingest::CaptureSettings;
use crate::Direction;

const DEFAULT_DB_PATH: &str = "plate_gate.db";
const DEFAULT_DETECTOR: &str = "stub";
const DEFAULT_DETECTOR_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Deserialize, Default)]
struct GateConfigFile {
    db_path: Option<String>,
    capture: Option<CaptureConfigFile>,
    voting: Option<VotingConfigFile>,
    detector: Option<DetectorConfigFile>,
    unknown_plates: Option<String>,
    cameras: Option<Vec<CameraConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    target_fps: Option<u32>,
    submit_every: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct VotingConfigFile {
    window: Option<usize>,
    quorum_percent: Option<u32>,
    inertia_percent: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    command: Option<String>,
    args: Option<Vec<String>>,
    timeout_ms: Option<u64>,
    stub_plates: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct CameraConfigFile {
    name: String,
    device: String,
    direction: Option<Direction>,
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub db_path: String,
    pub capture: CaptureSettings,
    pub voting: VotingSettings,
    pub detector: DetectorSettings,
    pub unknown_plates: UnknownPlatePolicy,
    pub cameras: Vec<CameraSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorSettings {
    /// Registry name of the backend; empty selects the registry default.
    pub backend: String,
    /// Executable for the `process` backend.
    pub command: Option<String>,
    pub args: Vec<String>,
    /// The `process` backend kills a run that takes longer than this.
    pub timeout_ms: u64,
    /// Plates the `stub` backend reports on every frame.
    pub stub_plates: Vec<String>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR.to_string(),
            command: None,
            args: Vec::new(),
            timeout_ms: DEFAULT_DETECTOR_TIMEOUT_MS,
            stub_plates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    pub name: String,
    /// Device spec: `stub://name`, a V4L2 index, or a `/dev/video*` path.
    pub device: String,
    pub direction: Direction,
}

/// What happens when a decided plate is not on the roster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownPlatePolicy {
    /// Ask the operator at the console.
    #[default]
    Ask,
    Allow,
    Deny,
}

impl FromStr for UnknownPlatePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ask" => Ok(Self::Ask),
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            other => Err(anyhow!(
                "unknown_plates must be one of ask, allow, deny (got {:?})",
                other
            )),
        }
    }
}

fn default_cameras() -> Vec<CameraSettings> {
    vec![
        CameraSettings {
            name: "entry".to_string(),
            device: "0".to_string(),
            direction: Direction::Entry,
        },
        CameraSettings {
            name: "exit".to_string(),
            device: "1".to_string(),
            direction: Direction::Exit,
        },
    ]
}

impl GateConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GATE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GateConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let capture_defaults = CaptureSettings::default();
        let capture = file.capture.unwrap_or_default();
        let capture = CaptureSettings {
            target_fps: capture.target_fps.unwrap_or(capture_defaults.target_fps),
            submit_every: capture.submit_every.unwrap_or(capture_defaults.submit_every),
            width: capture.width.unwrap_or(capture_defaults.width),
            height: capture.height.unwrap_or(capture_defaults.height),
        };

        let voting_defaults = VotingSettings::default();
        let voting = file.voting.unwrap_or_default();
        let voting = VotingSettings {
            window: voting.window.unwrap_or(voting_defaults.window),
            quorum_percent: voting.quorum_percent.unwrap_or(voting_defaults.quorum_percent),
            inertia_percent: voting
                .inertia_percent
                .unwrap_or(voting_defaults.inertia_percent),
        };

        let detector = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            command: detector.command,
            args: detector.args.unwrap_or_default(),
            timeout_ms: detector.timeout_ms.unwrap_or(DEFAULT_DETECTOR_TIMEOUT_MS),
            stub_plates: detector.stub_plates.unwrap_or_default(),
        };

        let unknown_plates = match file.unknown_plates {
            Some(policy) => policy.parse()?,
            None => UnknownPlatePolicy::default(),
        };

        let cameras = match file.cameras {
            Some(cameras) => cameras
                .into_iter()
                .map(|camera| CameraSettings {
                    name: camera.name,
                    device: camera.device,
                    direction: camera.direction.unwrap_or_default(),
                })
                .collect(),
            None => default_cameras(),
        };

        Ok(Self {
            db_path,
            capture,
            voting,
            detector,
            unknown_plates,
            cameras,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("GATE_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(fps) = std::env::var("GATE_CAPTURE_FPS") {
            self.capture.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("GATE_CAPTURE_FPS must be an integer frame rate"))?;
        }
        if let Ok(backend) = std::env::var("GATE_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(command) = std::env::var("GATE_DETECTOR_COMMAND") {
            if !command.trim().is_empty() {
                self.detector.command = Some(command);
            }
        }
        if let Ok(policy) = std::env::var("GATE_UNKNOWN_PLATES") {
            self.unknown_plates = policy.parse()?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.capture.validate()?;
        self.voting.validate()?;
        if self.detector.timeout_ms == 0 {
            return Err(anyhow!("detector timeout_ms must be greater than zero"));
        }
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }

        let mut seen = HashSet::new();
        for camera in &mut self.cameras {
            camera.name = camera.name.trim().to_string();
            if camera.name.is_empty() {
                return Err(anyhow!("camera name must not be empty"));
            }
            if camera.device.trim().is_empty() {
                return Err(anyhow!("camera {} has no device", camera.name));
            }
            if !seen.insert(camera.name.clone()) {
                return Err(anyhow!("duplicate camera name {}", camera.name));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<GateConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    if is_toml {
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    } else {
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_facility_layout() -> Result<()> {
        let cfg = GateConfig::from_file(GateConfigFile::default())?;
        assert_eq!(cfg.db_path, DEFAULT_DB_PATH);
        assert_eq!(cfg.capture.target_fps, 120);
        assert_eq!(cfg.capture.submit_every, 10);
        assert_eq!(cfg.voting.window, 10);
        assert_eq!(cfg.voting.quorum_percent, 60);
        assert_eq!(cfg.voting.inertia_percent, 50);
        assert_eq!(cfg.detector.backend, "stub");
        assert_eq!(cfg.detector.timeout_ms, 5_000);
        assert_eq!(cfg.unknown_plates, UnknownPlatePolicy::Ask);
        assert_eq!(cfg.cameras.len(), 2);
        assert_eq!(cfg.cameras[0].direction, Direction::Entry);
        assert_eq!(cfg.cameras[1].direction, Direction::Exit);
        Ok(())
    }

    #[test]
    fn rejects_duplicate_camera_names() -> Result<()> {
        let mut cfg = GateConfig::from_file(GateConfigFile::default())?;
        cfg.cameras[1].name = " entry ".to_string();
        assert!(cfg.validate().is_err());
        Ok(())
    }

    #[test]
    fn rejects_zero_rates() -> Result<()> {
        let mut cfg = GateConfig::from_file(GateConfigFile::default())?;
        cfg.capture.target_fps = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = GateConfig::from_file(GateConfigFile::default())?;
        cfg.voting.quorum_percent = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = GateConfig::from_file(GateConfigFile::default())?;
        cfg.detector.timeout_ms = 0;
        assert!(cfg.validate().is_err());
        Ok(())
    }

    #[test]
    fn policy_parsing() -> Result<()> {
        assert_eq!("Deny".parse::<UnknownPlatePolicy>()?, UnknownPlatePolicy::Deny);
        assert_eq!(" allow ".parse::<UnknownPlatePolicy>()?, UnknownPlatePolicy::Allow);
        assert!("maybe".parse::<UnknownPlatePolicy>().is_err());
        Ok(())
    }
}
