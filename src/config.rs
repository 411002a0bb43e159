use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use crate::detect::DevicePreference;

const DEFAULT_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_SOURCE_URI: &str = "v4l2:///dev/video1";
const DEFAULT_SOURCE_WIDTH: u32 = 1280;
const DEFAULT_SOURCE_HEIGHT: u32 = 720;
const DEFAULT_SOURCE_FPS: u32 = 30;
const DEFAULT_MODEL_PATH: &str = "yolov8m.onnx";
const DEFAULT_CLASSES_PATH: &str = "classes.txt";
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_PREVIEW_PATH: &str = "preview.jpg";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamerConfigFile {
    server: Option<ServerConfigFile>,
    source: Option<SourceConfigFile>,
    model: Option<ModelConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    preview: Option<PreviewConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ServerConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    path: Option<String>,
    classes: Option<PathBuf>,
    input_size: Option<u32>,
    confidence: Option<f32>,
    iou: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    target_size: Option<u32>,
    device: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PreviewConfigFile {
    mode: Option<String>,
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamerConfig {
    pub addr: String,
    pub source: SourceSettings,
    pub model: ModelSettings,
    /// Side of the square frame handed to the detector.
    pub target_size: u32,
    pub device: DevicePreference,
    pub preview: PreviewSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            uri: DEFAULT_SOURCE_URI.to_string(),
            width: DEFAULT_SOURCE_WIDTH,
            height: DEFAULT_SOURCE_HEIGHT,
            target_fps: DEFAULT_SOURCE_FPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    /// ONNX model file, or `stub://` for the built-in stub detector.
    pub path: String,
    pub classes: PathBuf,
    pub input_size: u32,
    pub confidence: f32,
    pub iou: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: DEFAULT_MODEL_PATH.to_string(),
            classes: PathBuf::from(DEFAULT_CLASSES_PATH),
            input_size: DEFAULT_MODEL_INPUT,
            confidence: DEFAULT_CONFIDENCE,
            iou: DEFAULT_IOU,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewSettings {
    None,
    Snapshot(PathBuf),
}

/// Values given on the command line. They win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub addr: Option<String>,
    pub source: Option<String>,
    pub model: Option<String>,
    pub classes: Option<PathBuf>,
    pub device: Option<String>,
    pub preview: Option<String>,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            source: SourceSettings::default(),
            model: ModelSettings::default(),
            target_size: crate::DEFAULT_TARGET_SIZE,
            device: DevicePreference::Auto,
            preview: PreviewSettings::None,
        }
    }
}

impl StreamerConfig {
    /// Load from `DETSTREAM_CONFIG` (if set) and the environment.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DETSTREAM_CONFIG").ok().map(PathBuf::from);
        Self::load_with(config_path.as_deref(), &ConfigOverrides::default())
    }

    /// Defaults, then the TOML file at `config_path`, then the environment,
    /// then `overrides`, then validation.
    pub fn load_with(config_path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.apply_overrides(overrides)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: StreamerConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let addr = file
            .server
            .and_then(|server| server.addr)
            .unwrap_or(defaults.addr);

        let source_file = file.source.unwrap_or_default();
        let source = SourceSettings {
            uri: source_file.uri.unwrap_or(defaults.source.uri),
            width: source_file.width.unwrap_or(defaults.source.width),
            height: source_file.height.unwrap_or(defaults.source.height),
            target_fps: source_file.target_fps.unwrap_or(defaults.source.target_fps),
        };

        let model_file = file.model.unwrap_or_default();
        let model = ModelSettings {
            path: model_file.path.unwrap_or(defaults.model.path),
            classes: model_file.classes.unwrap_or(defaults.model.classes),
            input_size: model_file.input_size.unwrap_or(defaults.model.input_size),
            confidence: model_file.confidence.unwrap_or(defaults.model.confidence),
            iou: model_file.iou.unwrap_or(defaults.model.iou),
        };

        let pipeline = file.pipeline.unwrap_or_default();
        let target_size = pipeline.target_size.unwrap_or(defaults.target_size);
        let device = match pipeline.device {
            Some(device) => device.parse()?,
            None => defaults.device,
        };

        let preview = match file.preview {
            Some(preview) => parse_preview(preview.mode.as_deref(), preview.path)?,
            None => defaults.preview,
        };

        Ok(Self {
            addr,
            source,
            model,
            target_size,
            device,
            preview,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_value("DETSTREAM_ADDR") {
            self.addr = addr;
        }
        if let Some(uri) = env_value("DETSTREAM_SOURCE") {
            self.source.uri = uri;
        }
        if let Some(path) = env_value("DETSTREAM_MODEL") {
            self.model.path = path;
        }
        if let Some(path) = env_value("DETSTREAM_CLASSES") {
            self.model.classes = PathBuf::from(path);
        }
        if let Some(device) = env_value("DETSTREAM_DEVICE") {
            self.device = device.parse()?;
        }
        if let Some(mode) = env_value("DETSTREAM_PREVIEW") {
            self.preview = parse_preview_flag(&mode)?;
        }
        if let Some(size) = env_value("DETSTREAM_TARGET_SIZE") {
            self.target_size = size.parse().map_err(|_| {
                anyhow!("DETSTREAM_TARGET_SIZE must be an integer number of pixels")
            })?;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Result<()> {
        if let Some(addr) = &overrides.addr {
            self.addr = addr.clone();
        }
        if let Some(uri) = &overrides.source {
            self.source.uri = uri.clone();
        }
        if let Some(path) = &overrides.model {
            self.model.path = path.clone();
        }
        if let Some(path) = &overrides.classes {
            self.model.classes = path.clone();
        }
        if let Some(device) = &overrides.device {
            self.device = device.parse()?;
        }
        if let Some(mode) = &overrides.preview {
            self.preview = parse_preview_flag(mode)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        if self.target_size == 0 {
            return Err(anyhow!("target size must be greater than zero"));
        }
        if self.model.input_size == 0 {
            return Err(anyhow!("model input size must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.model.confidence) {
            return Err(anyhow!("model confidence must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.model.iou) {
            return Err(anyhow!("model iou must be within [0, 1]"));
        }
        if self.source.uri.trim().is_empty() {
            return Err(anyhow!("frame source must not be empty"));
        }
        Ok(())
    }

    /// Resolve `addr`. Host names are allowed; the first resolved address
    /// is the one bound.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.addr
            .to_socket_addrs()
            .map_err(|e| anyhow!("invalid listen address '{}': {}", self.addr, e))?
            .next()
            .ok_or_else(|| anyhow!("listen address '{}' resolved to nothing", self.addr))
    }
}

fn read_config_file(path: &Path) -> Result<StreamerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_preview(mode: Option<&str>, path: Option<PathBuf>) -> Result<PreviewSettings> {
    match mode.unwrap_or("none") {
        "none" => Ok(PreviewSettings::None),
        "snapshot" => Ok(PreviewSettings::Snapshot(
            path.unwrap_or_else(|| PathBuf::from(DEFAULT_PREVIEW_PATH)),
        )),
        other => Err(anyhow!(
            "unknown preview mode '{}' (expected none or snapshot)",
            other
        )),
    }
}

/// `none`, `snapshot` or `snapshot:<path>`.
fn parse_preview_flag(value: &str) -> Result<PreviewSettings> {
    match value.split_once(':') {
        Some(("snapshot", path)) if !path.is_empty() => {
            Ok(PreviewSettings::Snapshot(PathBuf::from(path)))
        }
        Some(_) => Err(anyhow!("malformed preview setting '{}'", value)),
        None => parse_preview(Some(value), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_camera_deployment() {
        let cfg = StreamerConfig::default();
        assert_eq!(cfg.addr, "0.0.0.0:8080");
        assert_eq!(cfg.source.uri, "v4l2:///dev/video1");
        assert_eq!(cfg.model.path, "yolov8m.onnx");
        assert_eq!(cfg.model.classes, PathBuf::from("classes.txt"));
        assert_eq!(cfg.target_size, 1024);
        assert_eq!(cfg.preview, PreviewSettings::None);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn from_file_fills_missing_sections() -> Result<()> {
        let file: StreamerConfigFile = toml::from_str(
            r#"
            [model]
            path = "stub://"
            confidence = 0.5

            [preview]
            mode = "snapshot"
            "#,
        )?;
        let cfg = StreamerConfig::from_file(file)?;
        assert_eq!(cfg.model.path, "stub://");
        assert_eq!(cfg.model.confidence, 0.5);
        assert_eq!(cfg.model.iou, DEFAULT_IOU);
        assert_eq!(
            cfg.preview,
            PreviewSettings::Snapshot(PathBuf::from("preview.jpg"))
        );
        assert_eq!(cfg.source, SourceSettings::default());
        Ok(())
    }

    #[test]
    fn rejects_unknown_keys() {
        let parsed: Result<StreamerConfigFile, _> = toml::from_str("[server]\nport = 8080\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn overrides_win() -> Result<()> {
        let mut cfg = StreamerConfig::default();
        cfg.apply_overrides(&ConfigOverrides {
            addr: Some("127.0.0.1:9000".to_string()),
            source: Some("stub://cam".to_string()),
            device: Some("cpu".to_string()),
            preview: Some("snapshot:/tmp/p.jpg".to_string()),
            ..ConfigOverrides::default()
        })?;
        assert_eq!(cfg.addr, "127.0.0.1:9000");
        assert_eq!(cfg.source.uri, "stub://cam");
        assert_eq!(cfg.device, DevicePreference::Cpu);
        assert_eq!(
            cfg.preview,
            PreviewSettings::Snapshot(PathBuf::from("/tmp/p.jpg"))
        );
        Ok(())
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = StreamerConfig::default();
        cfg.addr = "not-an-address".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = StreamerConfig::default();
        cfg.addr = "127.0.0.1:99999".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = StreamerConfig::default();
        cfg.target_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = StreamerConfig::default();
        cfg.model.iou = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn listen_addr_accepts_host_names() -> Result<()> {
        let mut cfg = StreamerConfig::default();
        cfg.addr = "localhost:8080".to_string();
        cfg.validate()?;
        let addr = cfg.listen_addr()?;
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 8080);

        cfg.addr = "0.0.0.0:8080".to_string();
        assert_eq!(cfg.listen_addr()?, "0.0.0.0:8080".parse::<SocketAddr>()?);
        Ok(())
    }

    #[test]
    fn preview_flag_forms() {
        assert_eq!(parse_preview_flag("none").unwrap(), PreviewSettings::None);
        assert!(parse_preview_flag("window").is_err());
        assert!(parse_preview_flag("snapshot:").is_err());
    }
}
