// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Network interface name validation.

use std::fmt::Display;

/// Maximum length of a linux interface name, terminator included (IFNAMSIZ).
const IFNAMSIZ: usize = 16;

/// A validated linux network interface name.
///
/// Non-empty, shorter than IFNAMSIZ, no whitespace and no `/`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceName(String);

/// Errors which can occur while validating an [`InterfaceName`]
#[derive(Debug, thiserror::Error)]
pub enum IllegalInterfaceName {
    /// Interface names must not be empty
    #[error("interface name must not be empty")]
    Empty,
    /// Interface names are limited to IFNAMSIZ - 1 bytes
    #[error("interface name '{0}' is too long (max {max} bytes)", max = IFNAMSIZ - 1)]
    TooLong(String),
    /// Interface names must not contain whitespace or '/'
    #[error("interface name '{0}' contains an illegal character")]
    IllegalCharacter(String),
}

impl TryFrom<&str> for InterfaceName {
    type Error = IllegalInterfaceName;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(IllegalInterfaceName::Empty);
        }
        if value.len() >= IFNAMSIZ {
            return Err(IllegalInterfaceName::TooLong(value.to_string()));
        }
        if value.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(IllegalInterfaceName::IllegalCharacter(value.to_string()));
        }
        Ok(InterfaceName(value.to_string()))
    }
}

impl TryFrom<String> for InterfaceName {
    type Error = IllegalInterfaceName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        InterfaceName::try_from(value.as_str())
    }
}

impl From<InterfaceName> for String {
    fn from(value: InterfaceName) -> Self {
        value.0
    }
}

impl AsRef<str> for InterfaceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for InterfaceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}
