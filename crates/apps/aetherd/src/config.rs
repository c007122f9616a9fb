use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub emulator: EmulatorConfig,
    #[serde(default)]
    pub node: NodeConfig,
}

/// Where the audio-medium emulator lives. The frequency selects the
/// audio subchannel this node transmits on; nodes only hear peers tuned
/// to the same frequency.
#[derive(Debug, Deserialize)]
pub struct EmulatorConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_frequency")]
    pub frequency: u32,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8954
}

fn default_frequency() -> u32 {
    5200
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port(), frequency: default_frequency() }
    }
}

/// Node-side tunables.
#[derive(Debug, Deserialize)]
pub struct NodeConfig {
    /// Give up when joining the network takes longer than this many
    /// seconds; 0 waits forever.
    #[serde(default)]
    pub join_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { join_timeout_secs: 0 }
    }
}

impl NodeConfig {
    pub fn join_timeout(&self) -> Option<Duration> {
        if self.join_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.join_timeout_secs))
        }
    }
}

impl DaemonConfig {
    pub fn from_toml(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }

    pub fn emulator_addr(&self) -> String {
        format!("{}:{}", self.emulator.host, self.emulator.port)
    }
}
