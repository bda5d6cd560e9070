use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::ingest::CameraConfig;

const DEFAULT_DB_PATH: &str = "framekeeper.db";
const DEFAULT_CAPTURE_DIR: &str = "captured_images";
const DEFAULT_CAMERA_URL: &str = "stub://demo_camera";
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;

#[derive(Debug, Deserialize, Default)]
struct FramekeeperConfigFile {
    db_path: Option<String>,
    capture_dir: Option<PathBuf>,
    camera: Option<CameraConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct FramekeeperConfig {
    pub db_path: String,
    pub capture_dir: PathBuf,
    pub camera: CameraConfig,
}

impl FramekeeperConfig {
    /// Load configuration: explicit path, else `FRAMEKEEPER_CONFIG`, else
    /// defaults; then apply `FRAMEKEEPER_*` environment overrides and
    /// validate.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("FRAMEKEEPER_CONFIG").ok().map(PathBuf::from);
        let path = config_path.map(Path::to_path_buf).or(env_path);
        let file_cfg = match path {
            Some(path) => read_config_file(&path)?,
            None => FramekeeperConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FramekeeperConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let capture_dir = file
            .capture_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CAPTURE_DIR));
        let camera = CameraConfig {
            url: file
                .camera
                .as_ref()
                .and_then(|camera| camera.url.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            target_fps: file
                .camera
                .as_ref()
                .and_then(|camera| camera.target_fps)
                .unwrap_or(DEFAULT_CAMERA_FPS),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_CAMERA_HEIGHT),
        };
        Self {
            db_path,
            capture_dir,
            camera,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("FRAMEKEEPER_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(dir) = std::env::var("FRAMEKEEPER_CAPTURE_DIR") {
            if !dir.trim().is_empty() {
                self.capture_dir = PathBuf::from(dir);
            }
        }
        if let Ok(url) = std::env::var("FRAMEKEEPER_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera.url = url;
            }
        }
        if let Ok(fps) = std::env::var("FRAMEKEEPER_CAMERA_FPS") {
            let fps: u32 = fps
                .parse()
                .map_err(|_| anyhow!("FRAMEKEEPER_CAMERA_FPS must be an integer"))?;
            self.camera.target_fps = fps;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if self.capture_dir.as_os_str().is_empty() {
            return Err(anyhow!("capture_dir must not be empty"));
        }
        if self.camera.url.trim().is_empty() {
            return Err(anyhow!("camera url must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<FramekeeperConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
