//! Transmitter endpoint and video quality, parsed from sink params

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::ContractError;

/// Where the transmitter link is reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum TransmitterEndpoint {
    /// Connected datagram socket
    Udp { bind: SocketAddr, peer: SocketAddr },
    /// Serial device opened as a byte stream
    Serial { path: PathBuf },
    /// In-process simulated transmitter, optionally dropping every n-th datagram
    Loopback { drop_every: Option<u64> },
}

impl TransmitterEndpoint {
    /// Parse from sink `params`
    ///
    /// `transport = udp` needs `peer` (and optionally `bind`, default `0.0.0.0:0`),
    /// `transport = serial` needs `path`, `transport = loopback` accepts `drop_every`.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, ContractError> {
        let transport = params.get("transport").map(String::as_str).unwrap_or("udp");
        match transport {
            "udp" => {
                let peer = required(params, "peer")?;
                let peer = parse_addr("peer", peer)?;
                let bind = match params.get("bind") {
                    Some(bind) => parse_addr("bind", bind)?,
                    None => SocketAddr::from(([0, 0, 0, 0], 0)),
                };
                Ok(Self::Udp { bind, peer })
            }
            "serial" => Ok(Self::Serial {
                path: PathBuf::from(required(params, "path")?),
            }),
            "loopback" => {
                let drop_every = match params.get("drop_every") {
                    Some(raw) => Some(raw.parse::<u64>().map_err(|e| {
                        ContractError::config_validation(
                            "params.drop_every",
                            format!("'{raw}' is not a count: {e}"),
                        )
                    })?),
                    None => None,
                };
                Ok(Self::Loopback { drop_every })
            }
            other => Err(ContractError::config_validation(
                "params.transport",
                format!("unknown transport '{other}', expected udp, serial or loopback"),
            )),
        }
    }

    /// Short label for logs
    pub fn describe(&self) -> String {
        match self {
            Self::Udp { bind, peer } => format!("udp {bind} -> {peer}"),
            Self::Serial { path } => format!("serial {}", path.display()),
            Self::Loopback { drop_every: Some(n) } => format!("loopback (drop 1/{n})"),
            Self::Loopback { drop_every: None } => "loopback".to_string(),
        }
    }
}

fn required<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str, ContractError> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            ContractError::config_validation(format!("params.{key}"), "missing required parameter")
        })
}

fn parse_addr(key: &str, raw: &str) -> Result<SocketAddr, ContractError> {
    raw.parse().map_err(|e| {
        ContractError::config_validation(
            format!("params.{key}"),
            format!("'{raw}' is not a socket address: {e}"),
        )
    })
}

/// Requested transmitter video quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoQuality {
    #[default]
    High,
    Medium,
    Low,
}

impl VideoQuality {
    /// Wire code
    pub fn code(self) -> u8 {
        match self {
            Self::High => 0x01,
            Self::Medium => 0x02,
            Self::Low => 0x03,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::High),
            0x02 => Some(Self::Medium),
            0x03 => Some(Self::Low),
            _ => None,
        }
    }
}

impl FromStr for VideoQuality {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(ContractError::config_validation(
                "params.quality",
                format!("unknown quality '{other}', expected high, medium or low"),
            )),
        }
    }
}
