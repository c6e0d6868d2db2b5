use serde::{Deserialize, Serialize};

use crate::item::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinState {
    /// Follow the nearest ancestor with an explicit state.
    Inherited,
    AlwaysLocal,
    OnlineOnly,
    Unspecified,
}

impl PinState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PinState::Inherited => "inherited",
            PinState::AlwaysLocal => "always_local",
            PinState::OnlineOnly => "online_only",
            PinState::Unspecified => "unspecified",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ModelError> {
        match value {
            "inherited" => Ok(PinState::Inherited),
            "always_local" => Ok(PinState::AlwaysLocal),
            "online_only" => Ok(PinState::OnlineOnly),
            "unspecified" => Ok(PinState::Unspecified),
            other => Err(ModelError::InvalidPinState(other.to_string())),
        }
    }

    /// `AlwaysLocal` cannot describe a dehydrated placeholder.
    pub fn for_dehydrated(self) -> Self {
        match self {
            PinState::AlwaysLocal => PinState::Unspecified,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    FullyLocal,
    PartiallyLocal,
    FullyOnline,
    Unknown,
}

impl Availability {
    pub fn from_counts(hydrated: usize, dehydrated: usize) -> Self {
        match (hydrated, dehydrated) {
            (0, 0) => Availability::Unknown,
            (_, 0) => Availability::FullyLocal,
            (0, _) => Availability::FullyOnline,
            _ => Availability::PartiallyLocal,
        }
    }
}
