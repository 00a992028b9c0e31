//! # Configuration Management
//!
//! Loads the node's configuration surface from multiple sources:
//! - TOML configuration file (node.toml)
//! - Environment variables (with NODE_ prefix, `__` between nesting levels)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `DEVICE_ID` environment variable (device identity set by provisioning)
//! 2. Environment variables (NODE_UPLOAD__HOST, NODE_AUDIO__SAMPLE_RATE, etc.)
//! 3. Configuration file (node.toml)
//! 4. Default values (defined in the Default impl)
//!
//! The loaded configuration is installed once at startup with [`install`] and is
//! immutable for the rest of the process. Nothing in a capture/upload cycle
//! reads endpoint, identity or boundary values from anywhere else.

use crate::error::{NodeError, NodeResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::OnceLock;
use tracing::warn;

/// Process-wide configuration, set once by [`install`]
static NODE_CONFIG: OnceLock<NodeConfig> = OnceLock::new();

/// Longest boundary token allowed by RFC 2046
const MAX_BOUNDARY_LEN: usize = 70;

/// Complete node configuration.
///
/// ## Why separate config structs:
/// Each group maps to one stage of the cycle (capture, storage, upload) or to
/// one external collaborator (device identity, power management), so a stage
/// only ever borrows the section it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub audio: AudioConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub device: DeviceConfig,
    pub power: PowerConfig,
}

/// Where raw ADC readings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdcSource {
    /// Deterministic sine tone (bench runs, tests)
    Synthetic,
    /// Linux IIO sysfs channel (`in_voltageN_raw`)
    Iio,
}

/// How the sample clock waits for each scheduled instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingMode {
    /// Spin on the monotonic clock (hard real time, burns a core)
    Spin,
    /// Sleep until shortly before the deadline, then spin
    Hybrid,
}

/// Capture settings.
///
/// ## Fields:
/// - `sample_rate`: samples per second (8000 is plenty for noise levels)
/// - `duration_secs`: length of one recording; 0 records an empty WAV
/// - `adc_bits`: natural width W of the ADC, used by the PCM rescale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub duration_secs: u32,
    pub adc_bits: u8,
    pub source: AdcSource,
    pub iio_path: String,
    pub tone_hz: f64,
    pub timing: TimingMode,
}

/// Storage collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the recording (created on first use)
    pub root: String,
    /// File name of the per-cycle WAV, overwritten every cycle
    pub wav_name: String,
}

/// Upload endpoint and wire settings.
///
/// ## Fields:
/// - `use_tls`: wrap the socket in TLS
/// - `tls_insecure`: accept any certificate; explicit opt-in, off by default
/// - `boundary`: multipart boundary token, must not appear in the payload
/// - `window_bytes`: how many file bytes go into each chunked frame
/// - `timeout_secs`: deadline for the whole upload phase, 0 disables it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub use_tls: bool,
    pub tls_insecure: bool,
    pub boundary: String,
    pub window_bytes: usize,
    pub file_field: String,
    pub filename: String,
    pub content_type: String,
    pub timeout_secs: u64,
}

/// Identity and location metadata sent with every recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
}

/// Low-power and network-association settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    /// Suspend interval between cycles
    pub sleep_secs: u64,
    /// Number of cycles before exiting, 0 runs forever
    pub cycles: u32,
    /// How long to wait for the network link before giving up on a cycle
    pub link_wait_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig {
                sample_rate: 8000,
                duration_secs: 3,
                adc_bits: 12,                                   // ESP32-class ADC
                source: AdcSource::Synthetic,
                iio_path: "/sys/bus/iio/devices/iio:device0/in_voltage0_raw".to_string(),
                tone_hz: 440.0,
                timing: TimingMode::Spin,
            },
            storage: StorageConfig {
                root: "./data".to_string(),
                wav_name: "audio.wav".to_string(),
            },
            upload: UploadConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                path: "/upload".to_string(),
                use_tls: false,
                tls_insecure: false,
                boundary: "----EdgeNodeBoundary7MA4YWxkTrZu0gW".to_string(),
                window_bytes: 1024,
                file_field: "file".to_string(),
                filename: "audio.wav".to_string(),
                content_type: "audio/wav".to_string(),
                timeout_secs: 0,
            },
            device: DeviceConfig {
                id: "edge_01".to_string(),
                latitude: None,
                longitude: None,
            },
            power: PowerConfig {
                sleep_secs: 10,
                cycles: 0,
                link_wait_secs: 30,
            },
        }
    }
}

impl NodeConfig {
    /// Load configuration from defaults, `node.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `NODE_UPLOAD__HOST=192.168.1.228`: Override upload host
    /// - `NODE_UPLOAD__USE_TLS=true`: Switch to TLS
    /// - `NODE_AUDIO__DURATION_SECS=5`: Record five seconds per cycle
    /// - `DEVICE_ID=edge_07`: Special case set by provisioning scripts
    pub fn load() -> NodeResult<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&NodeConfig::default())?)
            .add_source(config::File::with_name("node").required(false))
            .add_source(
                config::Environment::with_prefix("NODE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(device_id) = env::var("DEVICE_ID") {
            settings = settings.set_override("device.id", device_id)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Sample rate and upload window are non-zero
    /// - ADC width W lies in 1..=16 (the PCM rescale needs 16 - W >= 0)
    /// - Upload host is set and port is not 0
    /// - Boundary is 1..=70 characters with no CR/LF
    pub fn validate(&self) -> NodeResult<()> {
        if self.audio.sample_rate == 0 {
            return Err(NodeError::Config("Sample rate must be greater than 0".to_string()));
        }

        if !(1..=16).contains(&self.audio.adc_bits) {
            return Err(NodeError::Config(format!(
                "ADC resolution must be between 1 and 16 bits, got {}",
                self.audio.adc_bits
            )));
        }

        if self.upload.window_bytes == 0 {
            return Err(NodeError::Config("Upload window must be greater than 0".to_string()));
        }

        if self.upload.host.trim().is_empty() {
            return Err(NodeError::Config("Upload host cannot be empty".to_string()));
        }

        if self.upload.port == 0 {
            return Err(NodeError::Config("Upload port cannot be 0".to_string()));
        }

        let boundary = &self.upload.boundary;
        if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
            return Err(NodeError::Config(format!(
                "Boundary must be 1..={} characters, got {}",
                MAX_BOUNDARY_LEN,
                boundary.len()
            )));
        }
        if boundary.contains('\r') || boundary.contains('\n') {
            return Err(NodeError::Config("Boundary cannot contain CR or LF".to_string()));
        }

        if self.upload.tls_insecure && !self.upload.use_tls {
            warn!("upload.tls_insecure is set but upload.use_tls is off; ignoring");
        }

        Ok(())
    }
}

/// Install the process-wide configuration.
///
/// The first call wins; later calls get the already installed value back,
/// so a cycle can never observe the configuration changing underneath it.
pub fn install(config: NodeConfig) -> &'static NodeConfig {
    NODE_CONFIG.get_or_init(|| config)
}
