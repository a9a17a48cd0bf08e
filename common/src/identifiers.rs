// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Identifiers used throughout the broker pipeline.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// External identifier of a message, assigned by the gateway at submission
/// time and unique across the registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, PartialOrd, Ord,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Stable identity of a submitting client machine. Matches the Common Name
/// of the client certificate.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, PartialOrd, Ord,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ClientId(String);

#[derive(Debug, Error)]
pub enum ClientIdError {
    #[error("client id must not be empty")]
    Empty,
    #[error("client id exceeds 255 characters")]
    TooLong,
}

impl ClientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ClientId {
    type Err = ClientIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ClientIdError::Empty);
        }
        if trimmed.len() > 255 {
            return Err(ClientIdError::TooLong);
        }
        Ok(Self(trimmed.to_owned()))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a delivery worker, used for attribution in delivery
/// confirmations and worker metrics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A sender number in E.164 format.
///
/// The raw number is only reachable through [`PhoneNumber::as_str`]. Both
/// `Debug` and `Display` print the masked form so that numbers never land in
/// logs or error chains unmasked.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PhoneNumber(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhoneNumberError {
    #[error("phone number must start with '+'")]
    MissingPlus,
    #[error("phone number must contain 2 to 15 digits")]
    BadLength,
    #[error("phone number must not start with a zero")]
    LeadingZero,
    #[error("phone number may only contain digits after '+'")]
    NonDigit,
}

impl PhoneNumber {
    /// The raw E.164 string, including the leading `+`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Masked rendition safe for logging: country prefix and the last two
    /// digits survive, everything in between is starred out.
    pub fn masked(&self) -> String {
        mask_phone(&self.0)
    }
}

impl FromStr for PhoneNumber {
    type Err = PhoneNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(digits) = s.strip_prefix('+') else {
            return Err(PhoneNumberError::MissingPlus);
        };
        if !(2..=15).contains(&digits.len()) {
            return Err(PhoneNumberError::BadLength);
        }
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PhoneNumberError::NonDigit);
        }
        if digits.starts_with('0') {
            return Err(PhoneNumberError::LeadingZero);
        }
        Ok(Self(s.to_owned()))
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.masked())
    }
}

impl fmt::Debug for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.masked())
    }
}

impl Serialize for PhoneNumber {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PhoneNumber {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Mask an E.164 number for log output. Keeps the `+`, up to two leading
/// digits and the last two digits.
pub fn mask_phone(raw: &str) -> String {
    let digits = raw.strip_prefix('+').unwrap_or(raw);
    let masked = if digits.len() <= 4 {
        "*".repeat(digits.len())
    } else {
        format!(
            "{}{}{}",
            &digits[..2],
            "*".repeat(digits.len() - 4),
            &digits[digits.len() - 2..]
        )
    };
    format!("+{masked}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e164_boundaries() {
        assert!("+1".parse::<PhoneNumber>().is_err());
        assert!("+12".parse::<PhoneNumber>().is_ok());
        assert!("+123456789012345".parse::<PhoneNumber>().is_ok());
        assert!("+1234567890123456".parse::<PhoneNumber>().is_err());
        assert!("+01234567890".parse::<PhoneNumber>().is_err());
        assert!("1234567".parse::<PhoneNumber>().is_err());
        assert!("+12345a7".parse::<PhoneNumber>().is_err());
        assert!("".parse::<PhoneNumber>().is_err());
    }

    #[test]
    fn e164_error_kinds() {
        assert_eq!(
            "+0123".parse::<PhoneNumber>().unwrap_err(),
            PhoneNumberError::LeadingZero
        );
        assert_eq!(
            "49152".parse::<PhoneNumber>().unwrap_err(),
            PhoneNumberError::MissingPlus
        );
    }

    #[test]
    fn display_and_debug_are_masked() {
        let number: PhoneNumber = "+491521234567".parse().unwrap();
        let display = number.to_string();
        let debug = format!("{number:?}");
        assert_eq!(display, debug);
        assert!(display.starts_with("+49"));
        assert!(display.ends_with("67"));
        assert!(display.contains('*'));
        assert_ne!(display, number.as_str());
    }

    #[test]
    fn masking_short_numbers_hides_all_digits() {
        assert_eq!(mask_phone("+12"), "+**");
        assert_eq!(mask_phone("+1234"), "+****");
    }

    #[test]
    fn serde_round_trip_carries_the_raw_number() {
        let number: PhoneNumber = "+491521234567".parse().unwrap();
        let json = serde_json::to_string(&number).unwrap();
        assert_eq!(json, "\"+491521234567\"");
        let back: PhoneNumber = serde_json::from_str(&json).unwrap();
        assert_eq!(back, number);
    }

    #[test]
    fn deserializing_an_invalid_number_fails() {
        assert!(serde_json::from_str::<PhoneNumber>("\"+0\"").is_err());
    }

    #[test]
    fn client_id_rejects_blank() {
        assert!("  ".parse::<ClientId>().is_err());
        assert!("client_alpha".parse::<ClientId>().is_ok());
    }

    #[test]
    fn message_id_parses_uuids() {
        let id: MessageId = "11111111-1111-1111-1111-111111111111".parse().unwrap();
        assert_eq!(id.to_string(), "11111111-1111-1111-1111-111111111111");
        assert!("deadbeef".parse::<MessageId>().is_err());
    }
}
