//! Entity identifiers of the form `domain.object_id`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error produced when parsing or constructing an entity id
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("entity id must be of the form domain.object_id")]
    MissingSeparator,

    #[error("entity id domain is empty")]
    EmptyDomain,

    #[error("entity id object_id is empty")]
    EmptyObjectId,

    #[error("invalid domain {0:?}: lowercase alphanumerics and single underscores only")]
    InvalidDomain(String),

    #[error("invalid object_id {0:?}: lowercase alphanumerics and underscores only")]
    InvalidObjectId(String),
}

/// A validated entity id such as `binary_sensor.hallway_motion`.
///
/// Stored as the full `domain.object_id` string plus the separator position,
/// so `domain()` and `object_id()` borrow without reassembling anything.
/// Both halves are restricted to lowercase alphanumerics and underscores;
/// neither may start or end with an underscore and the domain may not contain
/// a double underscore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    full: String,
    sep: usize,
}

impl EntityId {
    /// Build an entity id from its two halves.
    pub fn new(
        domain: impl AsRef<str>,
        object_id: impl AsRef<str>,
    ) -> Result<Self, EntityIdError> {
        let domain = domain.as_ref();
        let object_id = object_id.as_ref();

        validate_domain(domain)?;
        validate_object_id(object_id)?;

        Ok(Self {
            full: format!("{domain}.{object_id}"),
            sep: domain.len(),
        })
    }

    /// The domain half (`binary_sensor` in `binary_sensor.hallway_motion`).
    pub fn domain(&self) -> &str {
        &self.full[..self.sep]
    }

    /// The object_id half (`hallway_motion` in `binary_sensor.hallway_motion`).
    pub fn object_id(&self) -> &str {
        &self.full[self.sep + 1..]
    }

    /// The full `domain.object_id` string.
    pub fn as_str(&self) -> &str {
        &self.full
    }
}

fn valid_chars(s: &str) -> bool {
    !s.starts_with('_')
        && !s.ends_with('_')
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn validate_domain(s: &str) -> Result<(), EntityIdError> {
    if s.is_empty() {
        return Err(EntityIdError::EmptyDomain);
    }
    // Domains additionally reject double underscores.
    if s.contains("__") || !valid_chars(s) {
        return Err(EntityIdError::InvalidDomain(s.to_string()));
    }
    Ok(())
}

fn validate_object_id(s: &str) -> Result<(), EntityIdError> {
    if s.is_empty() {
        return Err(EntityIdError::EmptyObjectId);
    }
    if !valid_chars(s) {
        return Err(EntityIdError::InvalidObjectId(s.to_string()));
    }
    Ok(())
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut dots = s.match_indices('.');
        let (sep, _) = dots.next().ok_or(EntityIdError::MissingSeparator)?;
        if dots.next().is_some() {
            return Err(EntityIdError::MissingSeparator);
        }

        validate_domain(&s[..sep])?;
        validate_object_id(&s[sep + 1..])?;

        Ok(Self {
            full: s.to_string(),
            sep,
        })
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> String {
        id.full
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.full
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_and_accessors() {
        let id = EntityId::new("binary_sensor", "hallway_motion").unwrap();
        assert_eq!(id.domain(), "binary_sensor");
        assert_eq!(id.object_id(), "hallway_motion");
        assert_eq!(id.to_string(), "binary_sensor.hallway_motion");
    }

    #[test]
    fn test_parse() {
        let id: EntityId = "media_player.office".parse().unwrap();
        assert_eq!(id.domain(), "media_player");
        assert_eq!(id.object_id(), "office");
    }

    #[test]
    fn test_missing_or_extra_separator() {
        assert_eq!(
            "nodot".parse::<EntityId>().unwrap_err(),
            EntityIdError::MissingSeparator
        );
        assert_eq!(
            "a.b.c".parse::<EntityId>().unwrap_err(),
            EntityIdError::MissingSeparator
        );
    }

    #[test]
    fn test_empty_halves() {
        assert_eq!(
            ".thing".parse::<EntityId>().unwrap_err(),
            EntityIdError::EmptyDomain
        );
        assert_eq!(
            "light.".parse::<EntityId>().unwrap_err(),
            EntityIdError::EmptyObjectId
        );
    }

    #[test]
    fn test_character_rules() {
        assert!(matches!(
            "Light.room".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidDomain(_)
        ));
        assert!(matches!(
            "light.Room".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidObjectId(_)
        ));
        assert!(matches!(
            "my-light.room".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidDomain(_)
        ));
    }

    #[test]
    fn test_underscore_rules() {
        assert!("_light.room".parse::<EntityId>().is_err());
        assert!("light_.room".parse::<EntityId>().is_err());
        assert!("light._room".parse::<EntityId>().is_err());
        assert!("light.room_".parse::<EntityId>().is_err());
        // Double underscore is rejected in the domain but allowed in object ids.
        assert!("my__light.room".parse::<EntityId>().is_err());
        assert!("light.my__room".parse::<EntityId>().is_ok());
        assert!("my_light.living_room".parse::<EntityId>().is_ok());
    }

    #[test]
    fn test_serde_as_string() {
        let id = EntityId::new("switch", "kitchen").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"switch.kitchen\"");

        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<EntityId>("\"not an id\"").is_err());
    }
}
