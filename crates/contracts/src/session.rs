//! Cloud room and presentation boundaries
//!
//! Both collaborators are external; only their call surface is fixed here.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use crate::{ContractError, Frame, TelemetrySnapshot};

/// Tripped by the cloud collaborator when the session drops
pub type DisconnectSignal = CancellationToken;

/// Room to join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Signalling server URL
    pub url: String,
    /// Room name
    pub room: String,
    /// Participant identity
    pub participant: String,
}

impl RoomConfig {
    /// Parse from cloud sink `params` (`url`, `room`, optional `participant`)
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, ContractError> {
        let get = |key: &str| {
            params
                .get(key)
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .ok_or_else(|| {
                    ContractError::config_validation(
                        format!("params.{key}"),
                        "missing required parameter",
                    )
                })
        };
        Ok(Self {
            url: get("url")?,
            room: get("room")?,
            participant: params
                .get("participant")
                .cloned()
                .unwrap_or_else(|| "skyrelay-station".to_string()),
        })
    }
}

/// Cloud WebRTC room session
#[trait_variant::make(CloudSession: Send)]
pub trait LocalCloudSession {
    /// Join the room; the returned signal is cancelled when the session is lost
    async fn connect(&mut self, room: &RoomConfig) -> Result<DisconnectSignal, ContractError>;

    /// Publish one video frame on the room's video track
    async fn publish_frame(&mut self, frame: &Frame) -> Result<(), ContractError>;

    /// Publish a data-channel message
    async fn publish_data(&mut self, topic: &str, data: Bytes) -> Result<(), ContractError>;

    /// Leave the room
    async fn disconnect(&mut self) -> Result<(), ContractError>;
}

/// Local presentation layer (multipart stream + push updates)
///
/// Delivery is best-effort.
#[trait_variant::make(Presenter: Send)]
pub trait LocalPresenter {
    async fn push_frame(&mut self, frame: &Frame) -> Result<(), ContractError>;

    async fn push_telemetry(&mut self, snapshot: &TelemetrySnapshot) -> Result<(), ContractError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_from_params() {
        let params: HashMap<String, String> =
            [("url", "wss://rtc.example.net"), ("room", "drone-1")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
        let room = RoomConfig::from_params(&params).unwrap();
        assert_eq!(room.room, "drone-1");
        assert_eq!(room.participant, "skyrelay-station");

        let err = RoomConfig::from_params(&HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("params.url"));
    }
}
