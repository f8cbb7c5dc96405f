//! Device Authorization Grant artifacts and their polling state machine.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// A pending or authorized device authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCode {
    /// Random 32-character code held by the device.
    pub device_code: String,
    /// Short code the user types on the verification page.
    pub user_code: String,
    /// Client that started the flow.
    pub client_id: String,
    /// Requested scope (space-separated).
    pub scope: String,
    /// Minimum seconds between polls.
    pub interval: i64,
    /// Set once a user approved the request.
    pub is_authorized: bool,
    /// The approving user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Last poll that was accepted (answered pending or with tokens).
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_poll_time: Option<OffsetDateTime>,
    /// When the flow was started.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the codes stop working.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Lifecycle of a device authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCodeState {
    /// Waiting for the user.
    Pending,
    /// Approved by `user_id`, not yet picked up by the device.
    Authorized {
        /// The approving user.
        user_id: String,
    },
    /// Tokens were issued; the row is gone.
    Consumed,
    /// Past its expiry.
    Expired,
}

/// Answer to a single poll, decided from the stored row alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollDecision {
    /// `expired_token`.
    Expired,
    /// `authorization_pending`; the poll is accepted and recorded.
    Pending,
    /// `slow_down`; nothing is recorded.
    SlowDown,
    /// Mint tokens for `user_id` and consume the row.
    Ready {
        /// The approving user.
        user_id: String,
    },
}

impl DeviceCode {
    /// State of a stored row at `now`.
    ///
    /// `Consumed` is reported by [`DeviceCode::state_of`] for missing rows.
    #[must_use]
    pub fn state(&self, now: OffsetDateTime) -> DeviceCodeState {
        if now >= self.expires_at {
            return DeviceCodeState::Expired;
        }
        match (&self.user_id, self.is_authorized) {
            (Some(user_id), true) => DeviceCodeState::Authorized {
                user_id: user_id.clone(),
            },
            _ => DeviceCodeState::Pending,
        }
    }

    /// State of a possibly-missing row.
    #[must_use]
    pub fn state_of(row: Option<&Self>, now: OffsetDateTime) -> DeviceCodeState {
        row.map_or(DeviceCodeState::Consumed, |row| row.state(now))
    }

    /// Whether a poll at `now` comes too soon after the last accepted one.
    #[must_use]
    pub fn polled_too_soon(&self, now: OffsetDateTime) -> bool {
        self.last_poll_time
            .is_some_and(|last| now < last + Duration::seconds(self.interval))
    }

    /// Decides how to answer a poll at `now`.
    ///
    /// Order: expiry, then pending, then interval.
    #[must_use]
    pub fn evaluate_poll(&self, now: OffsetDateTime) -> PollDecision {
        match self.state(now) {
            DeviceCodeState::Expired | DeviceCodeState::Consumed => PollDecision::Expired,
            DeviceCodeState::Pending => PollDecision::Pending,
            DeviceCodeState::Authorized { .. } if self.polled_too_soon(now) => {
                PollDecision::SlowDown
            }
            DeviceCodeState::Authorized { user_id } => PollDecision::Ready { user_id },
        }
    }
}
