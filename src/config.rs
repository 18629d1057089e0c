use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::alert::EmailSettings;
use crate::caption::preprocess::{ChannelOrder, InputSpec};
use crate::caption::BeamConfig;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_SNAPSHOT_DIR: &str = ".";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 512 * 1024 * 1024;
const DEFAULT_CAMERA_DEVICES: [&str; 2] = ["/dev/video0", "/dev/video1"];
const DEFAULT_CAMERA_FPS: u32 = 15;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_IDLE_RETRY_MS: u64 = 1000;
const DEFAULT_CAPTION_POLL_MS: u64 = 100;
const DEFAULT_CAPTION_MAX_LENGTH: usize = 30;
const DEFAULT_CAPTION_BEAMS: usize = 5;
const DEFAULT_ENCODER_TOKENS: usize = 577;
const DEFAULT_ENCODER_DIM: usize = 1024;
const DEFAULT_BOS_TOKEN_ID: i64 = 30522;
const DEFAULT_EOS_TOKEN_ID: i64 = 102;
const DEFAULT_PAD_TOKEN_ID: i64 = 0;
const DEFAULT_DETECTOR_INPUT: u32 = 640;
const DEFAULT_CLASS_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_SUBJECT_CLASS: &str = "person";
const DEFAULT_SUBJECT_THRESHOLD: f32 = 0.5;
const DEFAULT_ALERT_COOLDOWN_SECS: u64 = 30;
const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
const DEFAULT_SMTP_PORT: u16 = 465;
const DEFAULT_ALERT_SUBJECT: &str = "Security alert: person detected";
const DEFAULT_TRANSLATE_URL: &str = "https://translate.googleapis.com/translate_a/single";
const DEFAULT_TTS_URL: &str = "https://translate.google.com/translate_tts";
const DEFAULT_SPEECH_TIMEOUT_SECS: u64 = 10;

/// Model backend selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Built-in, no model files.
    #[default]
    Stub,
    /// ONNX via tract (feature `backend-tract`).
    Tract,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!("unknown backend '{}'; expected stub or tract", other)),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct LivecapConfigFile {
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    stream: Option<StreamConfigFile>,
    caption: Option<CaptionConfigFile>,
    security: Option<SecurityConfigFile>,
    alert: Option<AlertConfigFile>,
    speech: Option<SpeechConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    snapshot_dir: Option<PathBuf>,
    upload_dir: Option<PathBuf>,
    max_upload_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    devices: Option<Vec<String>>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    jpeg_quality: Option<u8>,
    idle_retry_ms: Option<u64>,
    detect_every: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptionConfigFile {
    backend: Option<BackendKind>,
    poll_interval_ms: Option<u64>,
    encoder_path: Option<PathBuf>,
    decoder_path: Option<PathBuf>,
    vocab_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    channel_order: Option<ChannelOrder>,
    mean: Option<[f32; 3]>,
    std: Option<[f32; 3]>,
    encoder_tokens: Option<usize>,
    encoder_dim: Option<usize>,
    max_length: Option<usize>,
    num_beams: Option<usize>,
    bos_token_id: Option<i64>,
    eos_token_id: Option<i64>,
    pad_token_id: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
struct SecurityConfigFile {
    enabled: Option<bool>,
    backend: Option<BackendKind>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    class_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    subject_class: Option<String>,
    subject_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    cooldown_secs: Option<u64>,
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    subject: Option<String>,
    sender: Option<String>,
    password: Option<String>,
    receiver: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SpeechConfigFile {
    translate_url: Option<String>,
    tts_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LivecapConfig {
    pub api: ApiSettings,
    pub camera: CameraSettings,
    pub stream: StreamSettings,
    pub caption: CaptionSettings,
    pub security: SecuritySettings,
    pub alert: AlertSettings,
    pub speech: SpeechSettings,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub addr: String,
    pub snapshot_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Tried in order until one opens.
    pub devices: Vec<String>,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub jpeg_quality: u8,
    /// Pause between retries while no frame source is available.
    pub idle_retry: Duration,
    /// Run the detection stage on every Nth frame.
    pub detect_every: u32,
}

#[derive(Debug, Clone)]
pub struct CaptionSettings {
    pub backend: BackendKind,
    pub poll_interval: Duration,
    pub encoder_path: Option<PathBuf>,
    pub decoder_path: Option<PathBuf>,
    pub vocab_path: Option<PathBuf>,
    pub input: InputSpec,
    pub encoder_tokens: usize,
    pub encoder_dim: usize,
    pub beam: BeamConfig,
    pub pad_token_id: i64,
}

#[derive(Debug, Clone)]
pub struct SecuritySettings {
    pub enabled: bool,
    pub backend: BackendKind,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub class_threshold: f32,
    pub iou_threshold: f32,
    pub subject_class: String,
    pub subject_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub cooldown: Duration,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub subject: String,
    /// Destination and credentials; may also be supplied at runtime.
    pub email: Option<EmailSettings>,
}

#[derive(Debug, Clone)]
pub struct SpeechSettings {
    pub translate_url: String,
    pub tts_url: String,
    pub timeout: Duration,
}

impl Default for LivecapConfig {
    fn default() -> Self {
        // Every field of the file form is optional, so an empty file cannot fail.
        Self::from_file(LivecapConfigFile::default())
    }
}

impl LivecapConfig {
    /// Load from `LIVECAP_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LIVECAP_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (if any), then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => LivecapConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LivecapConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();
        let caption = file.caption.unwrap_or_default();
        let security = file.security.unwrap_or_default();
        let alert = file.alert.unwrap_or_default();
        let speech = file.speech.unwrap_or_default();

        let blip = InputSpec::blip();
        let email = match (alert.sender, alert.password, alert.receiver) {
            (Some(sender), Some(password), Some(receiver)) => Some(EmailSettings {
                sender,
                password,
                receiver,
            }),
            _ => None,
        };

        Self {
            api: ApiSettings {
                addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
                snapshot_dir: api
                    .snapshot_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
                upload_dir: api
                    .upload_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
                max_upload_bytes: api.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            },
            camera: CameraSettings {
                devices: camera.devices.unwrap_or_else(|| {
                    DEFAULT_CAMERA_DEVICES.iter().map(|d| d.to_string()).collect()
                }),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            },
            stream: StreamSettings {
                jpeg_quality: stream.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                idle_retry: Duration::from_millis(
                    stream.idle_retry_ms.unwrap_or(DEFAULT_IDLE_RETRY_MS),
                ),
                detect_every: stream.detect_every.unwrap_or(1),
            },
            caption: CaptionSettings {
                backend: caption.backend.unwrap_or_default(),
                poll_interval: Duration::from_millis(
                    caption.poll_interval_ms.unwrap_or(DEFAULT_CAPTION_POLL_MS),
                ),
                encoder_path: caption.encoder_path,
                decoder_path: caption.decoder_path,
                vocab_path: caption.vocab_path,
                input: InputSpec {
                    width: caption.input_width.unwrap_or(blip.width),
                    height: caption.input_height.unwrap_or(blip.height),
                    order: caption.channel_order.unwrap_or(blip.order),
                    mean: caption.mean.unwrap_or(blip.mean),
                    std: caption.std.unwrap_or(blip.std),
                },
                encoder_tokens: caption.encoder_tokens.unwrap_or(DEFAULT_ENCODER_TOKENS),
                encoder_dim: caption.encoder_dim.unwrap_or(DEFAULT_ENCODER_DIM),
                beam: BeamConfig {
                    max_length: caption.max_length.unwrap_or(DEFAULT_CAPTION_MAX_LENGTH),
                    num_beams: caption.num_beams.unwrap_or(DEFAULT_CAPTION_BEAMS),
                    bos_token_id: caption.bos_token_id.unwrap_or(DEFAULT_BOS_TOKEN_ID),
                    eos_token_id: caption.eos_token_id.unwrap_or(DEFAULT_EOS_TOKEN_ID),
                    length_penalty: 1.0,
                },
                pad_token_id: caption.pad_token_id.unwrap_or(DEFAULT_PAD_TOKEN_ID),
            },
            security: SecuritySettings {
                enabled: security.enabled.unwrap_or(false),
                backend: security.backend.unwrap_or_default(),
                model_path: security.model_path,
                input_size: security.input_size.unwrap_or(DEFAULT_DETECTOR_INPUT),
                class_threshold: security.class_threshold.unwrap_or(DEFAULT_CLASS_THRESHOLD),
                iou_threshold: security.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
                subject_class: security
                    .subject_class
                    .unwrap_or_else(|| DEFAULT_SUBJECT_CLASS.to_string()),
                subject_threshold: security
                    .subject_threshold
                    .unwrap_or(DEFAULT_SUBJECT_THRESHOLD),
            },
            alert: AlertSettings {
                cooldown: Duration::from_secs(
                    alert.cooldown_secs.unwrap_or(DEFAULT_ALERT_COOLDOWN_SECS),
                ),
                smtp_host: alert
                    .smtp_host
                    .unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
                smtp_port: alert.smtp_port.unwrap_or(DEFAULT_SMTP_PORT),
                subject: alert
                    .subject
                    .unwrap_or_else(|| DEFAULT_ALERT_SUBJECT.to_string()),
                email,
            },
            speech: SpeechSettings {
                translate_url: speech
                    .translate_url
                    .unwrap_or_else(|| DEFAULT_TRANSLATE_URL.to_string()),
                tts_url: speech.tts_url.unwrap_or_else(|| DEFAULT_TTS_URL.to_string()),
                timeout: Duration::from_secs(
                    speech.timeout_secs.unwrap_or(DEFAULT_SPEECH_TIMEOUT_SECS),
                ),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("LIVECAP_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api.addr = addr;
            }
        }
        if let Ok(devices) = std::env::var("LIVECAP_CAMERA_DEVICES") {
            let parsed = split_csv(&devices);
            if !parsed.is_empty() {
                self.camera.devices = parsed;
            }
        }
        if let Ok(backend) = std::env::var("LIVECAP_CAPTION_BACKEND") {
            if !backend.trim().is_empty() {
                self.caption.backend = backend.parse()?;
            }
        }
        if let Ok(enabled) = std::env::var("LIVECAP_SECURITY_ENABLED") {
            self.security.enabled = parse_bool(&enabled).ok_or_else(|| {
                anyhow!("LIVECAP_SECURITY_ENABLED must be true or false")
            })?;
        }
        if let Ok(backend) = std::env::var("LIVECAP_DETECTOR_BACKEND") {
            if !backend.trim().is_empty() {
                self.security.backend = backend.parse()?;
            }
        }
        if let Ok(cooldown) = std::env::var("LIVECAP_ALERT_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.parse().map_err(|_| {
                anyhow!("LIVECAP_ALERT_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alert.cooldown = Duration::from_secs(seconds);
        }

        let sender = env_nonempty("LIVECAP_ALERT_SENDER");
        let password = env_nonempty("LIVECAP_ALERT_PASSWORD");
        let receiver = env_nonempty("LIVECAP_ALERT_RECEIVER");
        if sender.is_some() || password.is_some() || receiver.is_some() {
            let current = self.alert.email.take();
            let pick = |env: Option<String>, file: Option<&str>| {
                env.or_else(|| file.map(|v| v.to_string()))
            };
            let merged = (
                pick(sender, current.as_ref().map(|e| e.sender.as_str())),
                pick(password, current.as_ref().map(|e| e.password.as_str())),
                pick(receiver, current.as_ref().map(|e| e.receiver.as_str())),
            );
            self.alert.email = match merged {
                (Some(sender), Some(password), Some(receiver)) => Some(EmailSettings {
                    sender,
                    password,
                    receiver,
                }),
                _ => {
                    log::warn!("incomplete alert email settings in environment; alerts stay unconfigured");
                    None
                }
            };
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be greater than zero"));
        }
        if self.camera.devices.is_empty() {
            return Err(anyhow!("at least one camera device must be configured"));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be between 1 and 100"));
        }
        if self.stream.detect_every == 0 {
            return Err(anyhow!("detect_every must be at least 1"));
        }
        if self.caption.beam.num_beams == 0 {
            return Err(anyhow!("caption num_beams must be at least 1"));
        }
        if self.caption.beam.max_length < 2 {
            return Err(anyhow!("caption max_length must be at least 2"));
        }
        if self.caption.input.std.iter().any(|s| *s == 0.0) {
            return Err(anyhow!("caption std values must be non-zero"));
        }
        for (name, value) in [
            ("class_threshold", self.security.class_threshold),
            ("iou_threshold", self.security.iou_threshold),
            ("subject_threshold", self.security.subject_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("security {} must be within 0..=1", name));
            }
        }
        if self.security.subject_class.trim().is_empty() {
            return Err(anyhow!("security subject_class must not be empty"));
        }
        if self.alert.cooldown.as_secs() == 0 {
            return Err(anyhow!("alert cooldown must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<LivecapConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_behavior() {
        let cfg = LivecapConfig::default();
        assert_eq!(cfg.api.addr, "127.0.0.1:8000");
        assert_eq!(cfg.camera.devices, vec!["/dev/video0", "/dev/video1"]);
        assert_eq!(cfg.caption.beam.max_length, 30);
        assert_eq!(cfg.caption.beam.num_beams, 5);
        assert_eq!(cfg.caption.poll_interval, Duration::from_millis(100));
        assert_eq!(cfg.security.subject_class, "person");
        assert_eq!(cfg.security.subject_threshold, 0.5);
        assert_eq!(cfg.alert.cooldown, Duration::from_secs(30));
        assert!(cfg.alert.email.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn backend_kind_parses_case_insensitively() {
        assert_eq!("Tract".parse::<BackendKind>().unwrap(), BackendKind::Tract);
        assert_eq!(" stub ".parse::<BackendKind>().unwrap(), BackendKind::Stub);
        assert!("torch".parse::<BackendKind>().is_err());
    }

    #[test]
    fn validate_rejects_zero_cooldown() {
        let mut cfg = LivecapConfig::default();
        cfg.alert.cooldown = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
