//! INI configuration reader.
//!
//! Lexical rules: `#` starts a comment, `[Section]` switches sections,
//! `key=value` assigns. Double-quoted values keep their leading and
//! trailing whitespace; unquoted values lose any trailing `#` comment
//! and surrounding whitespace.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::{GatewayError, Result};

/// The remote-side protocol, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Usrp,
    Raw,
    Iax,
}

impl FromStr for Protocol {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "USRP" => Ok(Protocol::Usrp),
            "RAW" => Ok(Protocol::Raw),
            "IAX" => Ok(Protocol::Iax),
            other => Err(GatewayError::InvalidConfig(format!(
                "unknown Protocol \"{other}\""
            ))),
        }
    }
}

/// Everything the gateway reads from its INI file.
#[derive(Debug, Clone)]
pub struct Config {
    pub callsign: String,
    pub protocol: Protocol,
    pub debug: bool,
    pub daemon: bool,

    pub log_display_level: u32,

    pub network_local_address: String,
    pub network_local_port: u16,
    pub network_rpt_address: String,
    pub network_rpt_port: u16,
    pub network_debug: bool,

    pub usrp_local_address: String,
    pub usrp_local_port: u16,
    pub usrp_remote_address: String,
    pub usrp_remote_port: u16,
    pub usrp_debug: bool,

    pub raw_local_address: String,
    pub raw_local_port: u16,
    pub raw_remote_address: String,
    pub raw_remote_port: u16,
    pub raw_sample_rate: u32,
    pub raw_squelch_file: String,
    pub raw_debug: bool,

    pub iax_local_address: String,
    pub iax_local_port: u16,
    pub iax_remote_address: String,
    pub iax_remote_port: u16,
    pub iax_username: String,
    pub iax_password: String,
    pub iax_node: String,
    pub iax_debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            callsign: String::new(),
            protocol: Protocol::Usrp,
            debug: false,
            daemon: false,
            log_display_level: 2,
            network_local_address: "127.0.0.1".to_string(),
            network_local_port: 0,
            network_rpt_address: "127.0.0.1".to_string(),
            network_rpt_port: 0,
            network_debug: false,
            usrp_local_address: "127.0.0.1".to_string(),
            usrp_local_port: 0,
            usrp_remote_address: "127.0.0.1".to_string(),
            usrp_remote_port: 0,
            usrp_debug: false,
            raw_local_address: "127.0.0.1".to_string(),
            raw_local_port: 0,
            raw_remote_address: "127.0.0.1".to_string(),
            raw_remote_port: 0,
            raw_sample_rate: 8000,
            raw_squelch_file: String::new(),
            raw_debug: false,
            iax_local_address: "127.0.0.1".to_string(),
            iax_local_port: 0,
            iax_remote_address: "127.0.0.1".to_string(),
            iax_remote_port: 0,
            iax_username: String::new(),
            iax_password: String::new(),
            iax_node: String::new(),
            iax_debug: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    General,
    Log,
    Mqtt,
    Network,
    UsrpNetwork,
    RawNetwork,
    IaxNetwork,
}

impl Config {
    /// Read and validate a configuration file.
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| GatewayError::ConfigOpen {
            path: path.display().to_string(),
            source,
        })?;

        let mut config = Config::default();
        config.parse(&text)?;
        config.validate()?;

        Ok(config)
    }

    /// Parse INI text into this configuration.
    fn parse(&mut self, text: &str) -> Result<()> {
        let mut section = Section::None;

        for line in text.lines() {
            if line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') {
                section = match line.trim() {
                    "[General]" => Section::General,
                    "[Log]" => Section::Log,
                    "[MQTT]" => Section::Mqtt,
                    "[Network]" => Section::Network,
                    "[USRP Network]" => Section::UsrpNetwork,
                    "[RAW Network]" => Section::RawNetwork,
                    "[IAX Network]" => Section::IaxNetwork,
                    _ => Section::None,
                };
                continue;
            }

            let Some((key, raw_value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }

            let value = clean_value(raw_value);
            self.assign(section, key, &value)?;
        }

        Ok(())
    }

    fn assign(&mut self, section: Section, key: &str, value: &str) -> Result<()> {
        match section {
            Section::General => match key {
                "Callsign" => self.callsign = value.to_string(),
                "Protocol" => self.protocol = value.parse()?,
                "Debug" => self.debug = value == "1",
                "Daemon" => self.daemon = value == "1",
                _ => {}
            },
            Section::Log => {
                if key == "DisplayLevel" {
                    self.log_display_level = value.parse().unwrap_or(2);
                }
            }
            Section::Mqtt | Section::None => {}
            Section::Network => match key {
                "LocalAddress" => self.network_local_address = value.to_string(),
                "LocalPort" => self.network_local_port = value.parse().unwrap_or(0),
                "RptAddress" => self.network_rpt_address = value.to_string(),
                "RptPort" => self.network_rpt_port = value.parse().unwrap_or(0),
                "Debug" => self.network_debug = value == "1",
                _ => {}
            },
            Section::UsrpNetwork => match key {
                "LocalAddress" => self.usrp_local_address = value.to_string(),
                "LocalPort" => self.usrp_local_port = value.parse().unwrap_or(0),
                "RemoteAddress" => self.usrp_remote_address = value.to_string(),
                "RemotePort" => self.usrp_remote_port = value.parse().unwrap_or(0),
                "Debug" => self.usrp_debug = value == "1",
                _ => {}
            },
            Section::RawNetwork => match key {
                "LocalAddress" => self.raw_local_address = value.to_string(),
                "LocalPort" => self.raw_local_port = value.parse().unwrap_or(0),
                "RemoteAddress" => self.raw_remote_address = value.to_string(),
                "RemotePort" => self.raw_remote_port = value.parse().unwrap_or(0),
                "SampleRate" => self.raw_sample_rate = value.parse().unwrap_or(8000),
                "SquelchFile" => self.raw_squelch_file = value.to_string(),
                "Debug" => self.raw_debug = value == "1",
                _ => {}
            },
            Section::IaxNetwork => match key {
                "LocalAddress" => self.iax_local_address = value.to_string(),
                "LocalPort" => self.iax_local_port = value.parse().unwrap_or(0),
                "RemoteAddress" => self.iax_remote_address = value.to_string(),
                "RemotePort" => self.iax_remote_port = value.parse().unwrap_or(0),
                "Username" => self.iax_username = value.to_string(),
                "Password" => self.iax_password = value.to_string(),
                "Node" => self.iax_node = value.to_string(),
                "Debug" => self.iax_debug = value == "1",
                _ => {}
            },
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.callsign.is_empty() {
            return Err(GatewayError::InvalidConfig(
                "Callsign is not set".to_string(),
            ));
        }

        match self.protocol {
            Protocol::Usrp => {
                if self.usrp_remote_port == 0 {
                    return Err(GatewayError::InvalidConfig(
                        "USRP RemotePort is not set".to_string(),
                    ));
                }
            }
            Protocol::Raw => {
                if self.raw_remote_port == 0 {
                    return Err(GatewayError::InvalidConfig(
                        "RAW RemotePort is not set".to_string(),
                    ));
                }
                if self.raw_sample_rate == 0 {
                    return Err(GatewayError::InvalidConfig(
                        "RAW SampleRate is not set".to_string(),
                    ));
                }
            }
            Protocol::Iax => {
                if self.iax_remote_port == 0 {
                    return Err(GatewayError::InvalidConfig(
                        "IAX RemotePort is not set".to_string(),
                    ));
                }
                if self.iax_username.is_empty()
                    || self.iax_password.is_empty()
                    || self.iax_node.is_empty()
                {
                    return Err(GatewayError::InvalidConfig(
                        "IAX Username, Password and Node must all be set".to_string(),
                    ));
                }
            }
        }

        if self.network_rpt_port == 0 {
            return Err(GatewayError::InvalidConfig(
                "repeater RptPort is not set".to_string(),
            ));
        }

        Ok(())
    }
}

/// Strip quoting, comments and padding from a raw INI value.
fn clean_value(raw: &str) -> String {
    let trimmed = raw.trim();

    if trimmed.len() > 1 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        return trimmed[1..trimmed.len() - 1].to_string();
    }

    let uncommented = match trimmed.find('#') {
        Some(pos) => &trimmed[..pos],
        None => trimmed,
    };

    uncommented.trim_end().to_string()
}
