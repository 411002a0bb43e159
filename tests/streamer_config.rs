use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use detection_stream::config::{ConfigOverrides, PreviewSettings, StreamerConfig};
use detection_stream::detect::DevicePreference;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DETSTREAM_CONFIG",
        "DETSTREAM_ADDR",
        "DETSTREAM_SOURCE",
        "DETSTREAM_MODEL",
        "DETSTREAM_CLASSES",
        "DETSTREAM_DEVICE",
        "DETSTREAM_PREVIEW",
        "DETSTREAM_TARGET_SIZE",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(toml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"
        [server]
        addr = "127.0.0.1:9100"

        [source]
        uri = "dir:///var/lib/frames"
        width = 800
        height = 600

        [model]
        path = "models/yolov8n.onnx"
        classes = "models/coco.txt"
        confidence = 0.4

        [pipeline]
        target_size = 640
        device = "cpu"

        [preview]
        mode = "snapshot"
        path = "/tmp/detstream-preview.jpg"
        "#,
    );

    std::env::set_var("DETSTREAM_CONFIG", file.path());
    std::env::set_var("DETSTREAM_SOURCE", "stub://bench?frames=3");
    std::env::set_var("DETSTREAM_TARGET_SIZE", "512");

    let cfg = StreamerConfig::load().expect("load config");

    assert_eq!(cfg.addr, "127.0.0.1:9100");
    assert_eq!(cfg.source.uri, "stub://bench?frames=3");
    assert_eq!(cfg.source.width, 800);
    assert_eq!(cfg.source.height, 600);
    assert_eq!(cfg.model.path, "models/yolov8n.onnx");
    assert_eq!(cfg.model.classes, PathBuf::from("models/coco.txt"));
    assert!((cfg.model.confidence - 0.4).abs() < f32::EPSILON);
    assert_eq!(cfg.target_size, 512);
    assert_eq!(cfg.device, DevicePreference::Cpu);
    assert_eq!(
        cfg.preview,
        PreviewSettings::Snapshot(PathBuf::from("/tmp/detstream-preview.jpg"))
    );

    clear_env();
}

#[test]
fn command_line_overrides_win_over_environment() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DETSTREAM_ADDR", "127.0.0.1:7000");
    std::env::set_var("DETSTREAM_DEVICE", "cuda");

    let overrides = ConfigOverrides {
        addr: Some("127.0.0.1:7001".to_string()),
        device: Some("cpu".to_string()),
        preview: Some("snapshot:out.jpg".to_string()),
        ..ConfigOverrides::default()
    };
    let cfg = StreamerConfig::load_with(None, &overrides).expect("load config");

    assert_eq!(cfg.addr, "127.0.0.1:7001");
    assert_eq!(cfg.device, DevicePreference::Cpu);
    assert_eq!(cfg.preview, PreviewSettings::Snapshot(PathBuf::from("out.jpg")));
    assert_eq!(cfg.listen_addr().unwrap().port(), 7001);

    clear_env();
}

#[test]
fn rejects_unknown_keys_and_bad_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let typo = write_config("[server]\nadress = \"0.0.0.0:8080\"\n");
    assert!(StreamerConfig::load_with(Some(typo.path()), &ConfigOverrides::default()).is_err());

    std::env::set_var("DETSTREAM_TARGET_SIZE", "big");
    assert!(StreamerConfig::load_with(None, &ConfigOverrides::default()).is_err());
    std::env::set_var("DETSTREAM_TARGET_SIZE", "0");
    assert!(StreamerConfig::load_with(None, &ConfigOverrides::default()).is_err());

    clear_env();
    std::env::set_var("DETSTREAM_DEVICE", "tpu");
    assert!(StreamerConfig::load_with(None, &ConfigOverrides::default()).is_err());

    clear_env();
}

#[test]
fn empty_environment_values_are_ignored() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DETSTREAM_ADDR", "");
    let cfg = StreamerConfig::load_with(None, &ConfigOverrides::default()).expect("load config");
    assert_eq!(cfg, StreamerConfig::default());

    clear_env();
}
