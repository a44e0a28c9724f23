use mirror_core::{EmotionLabel, PipelineConfig, UnknownEmotion};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid target emotion: {0}")]
    Target(#[from] UnknownEmotion),
}

/// Session host configuration.
///
/// Built from defaults, then an optional TOML file named by `MIRROR_CONFIG`,
/// then `MIRROR_*` environment variables (highest precedence).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Interval between prediction ticks.
    pub tick_ms: u64,
    /// Smoothed confidence must exceed this to count as showing the target.
    pub success_threshold: f32,
    /// Smoothing window capacity.
    pub window_size: usize,
    /// Clear the smoothing window after this many consecutive no-face frames.
    pub reset_after_missed_frames: Option<u32>,
    /// Emotion the player is asked to show.
    pub target_emotion: EmotionLabel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: mirror_core::default_model_dir(),
            tick_ms: 200,
            success_threshold: crate::feedback::SUCCESS_THRESHOLD,
            window_size: mirror_core::smoother::DEFAULT_WINDOW_SIZE,
            reset_after_missed_frames: None,
            target_emotion: EmotionLabel::Happy,
        }
    }
}

/// On-disk layer. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    model_dir: Option<PathBuf>,
    tick_ms: Option<u64>,
    success_threshold: Option<f32>,
    window_size: Option<usize>,
    reset_after_missed_frames: Option<u32>,
    target_emotion: Option<String>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("MIRROR_CONFIG").map(PathBuf::from) {
            let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let file: FileConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?;
            config.apply_file(file)?;
        }

        if let Some(device) = lookup("MIRROR_CAMERA_DEVICE") {
            config.camera_device = device;
        }
        if let Some(dir) = lookup("MIRROR_MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }
        config.tick_ms = parse_or(&lookup, "MIRROR_TICK_MS", config.tick_ms);
        config.success_threshold = parse_or(&lookup, "MIRROR_SUCCESS_THRESHOLD", config.success_threshold);
        config.window_size = parse_or(&lookup, "MIRROR_WINDOW_SIZE", config.window_size);
        if let Some(v) = lookup("MIRROR_RESET_AFTER_MISSED") {
            // 0 or an unparsable value disables the reset.
            config.reset_after_missed_frames = v.parse().ok().filter(|&n: &u32| n > 0);
        }
        if let Some(target) = lookup("MIRROR_TARGET_EMOTION") {
            config.target_emotion = target.parse()?;
        }

        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) -> Result<(), ConfigError> {
        if let Some(device) = file.camera_device {
            self.camera_device = device;
        }
        if let Some(dir) = file.model_dir {
            self.model_dir = dir;
        }
        if let Some(ms) = file.tick_ms {
            self.tick_ms = ms;
        }
        if let Some(threshold) = file.success_threshold {
            self.success_threshold = threshold;
        }
        if let Some(size) = file.window_size {
            self.window_size = size;
        }
        if file.reset_after_missed_frames.is_some() {
            self.reset_after_missed_frames = file.reset_after_missed_frames.filter(|&n| n > 0);
        }
        if let Some(target) = file.target_emotion {
            self.target_emotion = target.parse()?;
        }
        Ok(())
    }

    /// Tick interval, never shorter than 10 ms.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(10))
    }

    /// Pipeline settings rooted at `model_dir`.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            window_size: self.window_size,
            reset_after_missed_frames: self.reset_after_missed_frames,
            ..PipelineConfig::from_model_dir(&self.model_dir)
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.tick_ms, 200);
        assert!((config.success_threshold - 0.4).abs() < f32::EPSILON);
        assert_eq!(config.window_size, 5);
        assert_eq!(config.reset_after_missed_frames, None);
        assert_eq!(config.target_emotion, EmotionLabel::Happy);
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("MIRROR_CAMERA_DEVICE", "/dev/video3"),
            ("MIRROR_MODEL_DIR", "/opt/mirror/models"),
            ("MIRROR_TICK_MS", "100"),
            ("MIRROR_SUCCESS_THRESHOLD", "0.6"),
            ("MIRROR_WINDOW_SIZE", "7"),
            ("MIRROR_RESET_AFTER_MISSED", "10"),
            ("MIRROR_TARGET_EMOTION", "surprise"),
        ]))
        .unwrap();
        assert_eq!(config.camera_device, "/dev/video3");
        assert_eq!(config.model_dir, PathBuf::from("/opt/mirror/models"));
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
        assert!((config.success_threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.window_size, 7);
        assert_eq!(config.reset_after_missed_frames, Some(10));
        assert_eq!(config.target_emotion, EmotionLabel::Surprise);
    }

    #[test]
    fn test_unparsable_numbers_keep_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("MIRROR_TICK_MS", "fast"),
            ("MIRROR_RESET_AFTER_MISSED", "0"),
        ]))
        .unwrap();
        assert_eq!(config.tick_ms, 200);
        assert_eq!(config.reset_after_missed_frames, None);
    }

    #[test]
    fn test_unknown_target_is_an_error() {
        let err = Config::from_lookup(lookup(&[("MIRROR_TARGET_EMOTION", "bored")])).unwrap_err();
        assert!(matches!(err, ConfigError::Target(_)));
    }

    #[test]
    fn test_toml_layer() {
        let file: FileConfig =
            toml::from_str("camera_device = \"/dev/video5\"\ntick_ms = 250\ntarget_emotion = \"Sad\"\n").unwrap();
        let mut config = Config::default();
        config.apply_file(file).unwrap();
        assert_eq!(config.camera_device, "/dev/video5");
        assert_eq!(config.tick_ms, 250);
        assert_eq!(config.target_emotion, EmotionLabel::Sad);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        assert!(toml::from_str::<FileConfig>("camera = \"/dev/video1\"").is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::from_lookup(lookup(&[("MIRROR_CONFIG", "/nonexistent/mirror.toml")])).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_pipeline_config_uses_model_dir() {
        let config = Config {
            model_dir: PathBuf::from("/m"),
            window_size: 3,
            reset_after_missed_frames: Some(4),
            ..Config::default()
        };
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.detector_model, PathBuf::from("/m/scrfd_500m_bnkps.onnx"));
        assert_eq!(pipeline.window_size, 3);
        assert_eq!(pipeline.reset_after_missed_frames, Some(4));
    }
}
