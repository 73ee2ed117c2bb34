//! Stage identifiers, capability tags and descriptors.

use crate::errors::RegistryError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

const MAX_STAGE_ID_LEN: usize = 64;

/// A validated stage identifier.
///
/// Ids are 1-64 characters of ASCII letters, digits, `_`, `-` or `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StageId(String);

impl StageId {
    /// Creates a stage id after validating it.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::InvalidId` if the id is empty, too long, or
    /// contains characters outside the allowed set.
    pub fn new(id: impl Into<String>) -> Result<Self, RegistryError> {
        let id = id.into();

        if id.is_empty() {
            return Err(RegistryError::invalid_id(id, "must not be empty"));
        }
        if id.len() > MAX_STAGE_ID_LEN {
            return Err(RegistryError::invalid_id(
                id,
                format!("must be at most {MAX_STAGE_ID_LEN} characters"),
            ));
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(RegistryError::invalid_id(
                id.clone(),
                format!("contains invalid character {bad:?}"),
            ));
        }

        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Context key holding this stage's published output.
    #[must_use]
    pub fn result_key(&self) -> String {
        format!("{}_result", self.0)
    }

    /// Context key holding this stage's confidence.
    #[must_use]
    pub fn confidence_key(&self) -> String {
        format!("{}_confidence", self.0)
    }

    /// Context key holding this stage's failure diagnostic.
    #[must_use]
    pub fn error_key(&self) -> String {
        format!("{}_error", self.0)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for StageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for StageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StageId {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for StageId {
    type Error = RegistryError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StageId> for String {
    fn from(id: StageId) -> Self {
        id.0
    }
}

/// The kind of analysis a stage performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Document type classification.
    Classification,
    /// Structured field extraction.
    Extraction,
    /// Risk scoring of clauses or entities.
    RiskScoring,
    /// Summarization.
    Summarization,
    /// Translation.
    Translation,
    /// Sentiment analysis.
    Sentiment,
    /// Comparison between documents or versions.
    Comparison,
    /// Anything else.
    #[default]
    Custom,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classification => write!(f, "classification"),
            Self::Extraction => write!(f, "extraction"),
            Self::RiskScoring => write!(f, "risk_scoring"),
            Self::Summarization => write!(f, "summarization"),
            Self::Translation => write!(f, "translation"),
            Self::Sentiment => write!(f, "sentiment"),
            Self::Comparison => write!(f, "comparison"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Static description of a registered stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// Unique stage id.
    pub id: StageId,
    /// Capability tag.
    pub capability: Capability,
    /// Whether the stage may be selected more than once per trace.
    #[serde(default)]
    pub reentrant: bool,
    /// Optional description shown to the decision provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StageDescriptor {
    /// Creates a descriptor for a non-reentrant stage.
    #[must_use]
    pub fn new(id: StageId, capability: Capability) -> Self {
        Self {
            id,
            capability,
            reentrant: false,
            description: None,
        }
    }

    /// Creates a descriptor, validating the raw id.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::InvalidId` for an invalid id.
    pub fn parse(id: &str, capability: Capability) -> Result<Self, RegistryError> {
        Ok(Self::new(StageId::new(id)?, capability))
    }

    /// Marks the stage as re-entrant.
    #[must_use]
    pub fn reentrant(mut self) -> Self {
        self.reentrant = true;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
