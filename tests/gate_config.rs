use std::io::Write;
use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use plate_gate::config::{GateConfig, UnknownPlatePolicy};
use plate_gate::Direction;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "GATE_CONFIG",
        "GATE_DB_PATH",
        "GATE_CAPTURE_FPS",
        "GATE_DETECTOR",
        "GATE_DETECTOR_COMMAND",
        "GATE_UNKNOWN_PLATES",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "gate_prod.db",
        "capture": { "target_fps": 60, "submit_every": 5, "width": 1280, "height": 720 },
        "voting": { "window": 12, "quorum_percent": 70, "inertia_percent": 40 },
        "detector": {
            "backend": "process",
            "command": "/opt/anpr/detect",
            "args": ["--json"],
            "timeout_ms": 800
        },
        "unknown_plates": "deny",
        "cameras": [
            { "name": "north", "device": "/dev/video2", "direction": "entry" },
            { "name": "south", "device": "stub://south", "direction": "exit" },
            { "name": "yard", "device": "3" }
        ]
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("GATE_CONFIG", file.path());
    std::env::set_var("GATE_CAPTURE_FPS", "30");
    std::env::set_var("GATE_UNKNOWN_PLATES", "ask");

    let cfg = GateConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "gate_prod.db");
    assert_eq!(cfg.capture.target_fps, 30);
    assert_eq!(cfg.capture.submit_every, 5);
    assert_eq!(cfg.capture.width, 1280);
    assert_eq!(cfg.capture.height, 720);
    assert_eq!(cfg.voting.window, 12);
    assert_eq!(cfg.voting.quorum_percent, 70);
    assert_eq!(cfg.voting.inertia_percent, 40);
    assert_eq!(cfg.detector.backend, "process");
    assert_eq!(cfg.detector.command.as_deref(), Some("/opt/anpr/detect"));
    assert_eq!(cfg.detector.args, vec!["--json"]);
    assert_eq!(cfg.detector.timeout_ms, 800);
    assert_eq!(cfg.unknown_plates, UnknownPlatePolicy::Ask);
    assert_eq!(cfg.cameras.len(), 3);
    assert_eq!(cfg.cameras[0].direction, Direction::Entry);
    assert_eq!(cfg.cameras[1].device, "stub://south");
    assert_eq!(cfg.cameras[2].direction, Direction::Unspecified);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
db_path = "gate.db"
unknown_plates = "allow"

[detector]
backend = "stub"
stub_plates = ["A123BC45"]

[[cameras]]
name = "gate"
device = "stub://gate"
direction = "exit"
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    std::env::set_var("GATE_CONFIG", file.path());
    std::env::set_var("GATE_DB_PATH", "override.db");

    let cfg = GateConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "override.db");
    assert_eq!(cfg.unknown_plates, UnknownPlatePolicy::Allow);
    assert_eq!(cfg.detector.stub_plates, vec!["A123BC45"]);
    assert_eq!(cfg.capture.target_fps, 120);
    assert_eq!(cfg.cameras.len(), 1);
    assert_eq!(cfg.cameras[0].direction, Direction::Exit);

    clear_env();
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = GateConfig::load().expect("load config");
    assert_eq!(cfg.cameras.len(), 2);
    assert_eq!(cfg.cameras[0].device, "0");
    assert_eq!(cfg.cameras[1].device, "1");
    assert_eq!(cfg.voting.quorum_percent, 60);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("GATE_CAPTURE_FPS", "fast");
    assert!(GateConfig::load().is_err());
    std::env::set_var("GATE_CAPTURE_FPS", "0");
    assert!(GateConfig::load().is_err());
    clear_env();

    std::env::set_var("GATE_UNKNOWN_PLATES", "sometimes");
    assert!(GateConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "cameras": [
        { "name": "gate", "device": "0" },
        { "name": "gate", "device": "1" }
    ] }"#;
    file.write_all(json.as_bytes()).expect("write config");
    std::env::set_var("GATE_CONFIG", file.path());
    assert!(GateConfig::load().is_err());

    clear_env();
}
