//! Runtime configuration.
//!
//! Built-in defaults, overlaid by an optional TOML file, overlaid by
//! `ROLLCALL_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Minimum match confidence (percent) for attendance to be recorded.
pub const DEFAULT_CONFIDENCE_THRESHOLD: u8 = 65;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Application configuration shared by the console and the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Root for everything below unless overridden.
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub encodings_path: PathBuf,
    /// One reference photo per known person.
    pub photos_dir: PathBuf,
    /// Attendance snapshot images.
    pub snapshot_dir: PathBuf,
    /// Minimum confidence (0–100) to record attendance.
    pub confidence_threshold: u8,
    /// Recognition attempts per mark request.
    pub max_attempts: u32,
    /// Pause before retrying after a low-confidence match.
    pub retry_delay_ms: u64,
    /// Frames captured per attempt (also the liveness window).
    pub frames_per_attempt: usize,
    /// Frames discarded after opening the camera (auto exposure settling).
    pub warmup_frames: usize,
    pub liveness_enabled: bool,
    /// Minimum mean eye movement in pixels for a live face.
    pub liveness_min_displacement: f32,
    pub max_roll_degrees: f32,
    pub max_yaw_ratio: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_data_dir(default_data_dir())
    }
}

impl Config {
    /// Defaults with every data path rooted at `data_dir`.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: data_dir.join("models"),
            db_path: data_dir.join("attendance.db"),
            encodings_path: data_dir.join("encodings.json"),
            photos_dir: data_dir.join("photos"),
            snapshot_dir: data_dir.join("snapshots"),
            data_dir,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_attempts: 3,
            retry_delay_ms: 1000,
            frames_per_attempt: 3,
            warmup_frames: 4,
            liveness_enabled: true,
            liveness_min_displacement: crate::liveness::DEFAULT_MIN_EYE_DISPLACEMENT,
            max_roll_degrees: 20.0,
            max_yaw_ratio: 0.35,
        }
    }

    /// Load from the config file (if any) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Like [`Config::load`], with `explicit` taking the place of
    /// `$ROLLCALL_CONFIG` and the XDG path. An explicit file must exist.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::Read {
                        path: path.to_path_buf(),
                        source: std::io::Error::from(std::io::ErrorKind::NotFound),
                    });
                }
                path.to_path_buf()
            }
            None => std::env::var("ROLLCALL_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_config_path()),
        };
        let env: Vec<(String, String)> = std::env::vars()
            .filter(|(k, _)| k.starts_with("ROLLCALL_"))
            .collect();
        Self::resolve(Some(&path), &env)
    }

    /// Layer a TOML file and `ROLLCALL_*` pairs over the defaults.
    ///
    /// A missing file is not an error. `ROLLCALL_DATA_DIR` re-roots the data
    /// paths the file and environment leave unset.
    pub fn resolve(file: Option<&Path>, env: &[(String, String)]) -> Result<Self, ConfigError> {
        let lookup = |key: &str| env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

        let table: toml::Table = match file.filter(|p| p.exists()) {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                let table = raw.parse::<toml::Table>().map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
                tracing::debug!(path = %path.display(), "loaded config file");
                table
            }
            None => toml::Table::new(),
        };

        let data_dir = lookup("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .or_else(|| table.get("data_dir").and_then(|v| v.as_str()).map(PathBuf::from))
            .unwrap_or_else(default_data_dir);

        // File keys win over the data-dir-rooted defaults.
        let mut config: Config = {
            let mut base = match toml::Value::try_from(Self::with_data_dir(data_dir.clone())) {
                Ok(toml::Value::Table(base)) => base,
                Ok(_) => return Err(ConfigError::Invalid("defaults did not serialize to a table".into())),
                Err(e) => return Err(ConfigError::Invalid(e.to_string())),
            };
            base.extend(table);
            let path = file.map(Path::to_path_buf).unwrap_or_default();
            toml::Value::Table(base)
                .try_into()
                .map_err(|source| ConfigError::Parse { path, source })?
        };
        config.data_dir = data_dir;

        if let Some(v) = lookup("ROLLCALL_CAMERA_DEVICE") {
            config.camera_device = v.to_string();
        }
        for (key, slot) in [
            ("ROLLCALL_MODEL_DIR", &mut config.model_dir),
            ("ROLLCALL_DB_PATH", &mut config.db_path),
            ("ROLLCALL_ENCODINGS_PATH", &mut config.encodings_path),
            ("ROLLCALL_PHOTOS_DIR", &mut config.photos_dir),
            ("ROLLCALL_SNAPSHOT_DIR", &mut config.snapshot_dir),
        ] {
            if let Some(v) = lookup(key) {
                *slot = PathBuf::from(v);
            }
        }
        env_parse(&lookup, "ROLLCALL_CONFIDENCE_THRESHOLD", &mut config.confidence_threshold)?;
        env_parse(&lookup, "ROLLCALL_MAX_ATTEMPTS", &mut config.max_attempts)?;
        env_parse(&lookup, "ROLLCALL_RETRY_DELAY_MS", &mut config.retry_delay_ms)?;
        env_parse(&lookup, "ROLLCALL_FRAMES_PER_ATTEMPT", &mut config.frames_per_attempt)?;
        env_parse(&lookup, "ROLLCALL_WARMUP_FRAMES", &mut config.warmup_frames)?;
        env_parse(&lookup, "ROLLCALL_LIVENESS_MIN_DISPLACEMENT", &mut config.liveness_min_displacement)?;
        env_parse(&lookup, "ROLLCALL_MAX_ROLL_DEGREES", &mut config.max_roll_degrees)?;
        env_parse(&lookup, "ROLLCALL_MAX_YAW_RATIO", &mut config.max_yaw_ratio)?;
        env_flag(&lookup, "ROLLCALL_LIVENESS_ENABLED", &mut config.liveness_enabled)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.confidence_threshold > 100 {
            return Err(ConfigError::Invalid(format!(
                "confidence_threshold must be 0–100, got {}",
                self.confidence_threshold
            )));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.frames_per_attempt == 0 {
            return Err(ConfigError::Invalid("frames_per_attempt must be at least 1".into()));
        }
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }
}

fn env_parse<'a, T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<&'a str>,
    key: &str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(key) {
        *slot = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value: raw.to_string(),
        })?;
    }
    Ok(())
}

/// `$XDG_DATA_HOME/rollcall`, falling back to `~/.local/share/rollcall`.
pub fn default_data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share").join("rollcall")
}

/// `$XDG_CONFIG_HOME/rollcall/config.toml`, falling back to `~/.config`.
pub fn default_config_path() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config").join("rollcall").join("config.toml")
}

fn xdg_dir(var: &str, home_fallback: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(home_fallback)
    })
}

/// Boolean env var: `1/true/yes/on` or `0/false/no/off`, any case.
fn env_flag<'a>(
    lookup: &impl Fn(&str) -> Option<&'a str>,
    key: &str,
    slot: &mut bool,
) -> Result<(), ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(());
    };
    *slot = match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            return Err(ConfigError::InvalidEnv {
                key: key.to_string(),
                value: raw.to_string(),
            })
        }
    };
    Ok(())
}
