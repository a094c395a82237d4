//! Protocol types and message definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Participant identifier, supplied by the client at connect time
pub type ParticipantId = String;

/// Header `type` of a binary frame carrying an avatar model
pub const VRM_DATA: &str = "vrmData";

/// Text envelope exchanged over the control channel.
///
/// Every envelope is a JSON object whose `type` field selects the variant.
/// Types this build does not know decode to [`Envelope::Unknown`] so that
/// newer peers can add messages without breaking older relays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "existingUsers")]
    ExistingUsers(ExistingUsersMessage),

    #[serde(rename = "userJoined")]
    UserJoined(UserJoinedMessage),

    #[serde(rename = "userLeft")]
    UserLeft(UserLeftMessage),

    #[serde(rename = "motion")]
    Motion(MotionMessage),

    #[serde(rename = "requestAllVrms")]
    RequestAllVrms,

    #[serde(rename = "requestVrm")]
    RequestVrm(RequestVrmMessage),

    #[serde(rename = "sendVrmTo")]
    SendVrmTo(SendVrmToMessage),

    #[serde(other)]
    Unknown,
}

impl Envelope {
    /// Wire name of the `type` field
    pub fn type_name(&self) -> &'static str {
        match self {
            Envelope::ExistingUsers(_) => "existingUsers",
            Envelope::UserJoined(_) => "userJoined",
            Envelope::UserLeft(_) => "userLeft",
            Envelope::Motion(_) => "motion",
            Envelope::RequestAllVrms => "requestAllVrms",
            Envelope::RequestVrm(_) => "requestVrm",
            Envelope::SendVrmTo(_) => "sendVrmTo",
            Envelope::Unknown => "unknown",
        }
    }

    pub fn existing_users(ids: Vec<ParticipantId>) -> Self {
        Envelope::ExistingUsers(ExistingUsersMessage {
            existing_user_ids: ids,
        })
    }

    pub fn user_joined(user_id: impl Into<ParticipantId>) -> Self {
        Envelope::UserJoined(UserJoinedMessage {
            user_id: user_id.into(),
        })
    }

    pub fn user_left(user_id: impl Into<ParticipantId>) -> Self {
        Envelope::UserLeft(UserLeftMessage {
            user_id: user_id.into(),
        })
    }

    pub fn motion(user_id: impl Into<ParticipantId>, data: Value) -> Self {
        Envelope::Motion(MotionMessage {
            user_id: user_id.into(),
            data,
        })
    }

    pub fn request_vrm(
        request_from: impl Into<ParticipantId>,
        request_to: impl Into<ParticipantId>,
    ) -> Self {
        Envelope::RequestVrm(RequestVrmMessage {
            request_from: request_from.into(),
            request_to: request_to.into(),
        })
    }

    pub fn send_vrm_to(target_id: impl Into<ParticipantId>) -> Self {
        Envelope::SendVrmTo(SendVrmToMessage {
            target_id: target_id.into(),
        })
    }
}

/// Initial roster sent to a participant right after it joins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingUsersMessage {
    #[serde(default)]
    pub existing_user_ids: Vec<ParticipantId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoinedMessage {
    pub user_id: ParticipantId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeftMessage {
    pub user_id: ParticipantId,
}

/// One motion sample. `data` is opaque to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionMessage {
    pub user_id: ParticipantId,
    #[serde(default)]
    pub data: Value,
}

/// Ask `request_to` to push its asset to `request_from`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestVrmMessage {
    pub request_from: ParticipantId,
    pub request_to: ParticipantId,
}

/// Instructs the recipient to push its own asset to `target_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendVrmToMessage {
    pub target_id: ParticipantId,
}

/// JSON header of a binary frame.
///
/// The relay only reads `target_id`; `kind` and `sender_id` are for the
/// receiving client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameHeader {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<ParticipantId>,
}

impl FrameHeader {
    /// Header for an avatar model addressed to one participant
    pub fn vrm_data(
        sender_id: impl Into<ParticipantId>,
        target_id: impl Into<ParticipantId>,
    ) -> Self {
        Self {
            kind: VRM_DATA.to_string(),
            sender_id: Some(sender_id.into()),
            target_id: Some(target_id.into()),
        }
    }

    /// Header for an avatar model published to every other participant
    pub fn vrm_data_broadcast(sender_id: impl Into<ParticipantId>) -> Self {
        Self {
            kind: VRM_DATA.to_string(),
            sender_id: Some(sender_id.into()),
            target_id: None,
        }
    }

    pub fn is_vrm_data(&self) -> bool {
        self.kind == VRM_DATA
    }
}
