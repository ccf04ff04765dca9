// src/models/source.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ReconcileError, Result};

/// External systems that feed organization records into reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Humanitarian data catalog. Carries a cross-reference id into the registry.
    CatalogA,
    /// HR / financial export. Identifies organizations by abbreviation first.
    CatalogB,
}

/// Conceptual attribute of an external record looked up during exact matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CascadeField {
    ReferenceId,
    Abbreviation,
    DisplayName,
    LongName,
    ShortName,
    Alias,
}

/// Attribute of a canonical organization that can be looked up by exact value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    Id,
    ReferenceId,
    DisplayName,
    LongName,
    ShortName,
    Alias,
}

/// Queue payload keys for one source.
#[derive(Debug)]
pub struct SourceSchema {
    pub id_key: &'static str,
    pub display_name_key: &'static str,
    pub long_name_key: Option<&'static str>,
    pub short_name_key: Option<&'static str>,
    pub abbreviation_key: Option<&'static str>,
    pub alias_key: Option<&'static str>,
    pub reference_id_key: Option<&'static str>,
    pub cascade: &'static [CascadeField],
}

const CATALOG_A_SCHEMA: SourceSchema = SourceSchema {
    id_key: "id",
    display_name_key: "name",
    long_name_key: Some("title"),
    short_name_key: Some("acronym"),
    abbreviation_key: None,
    alias_key: Some("aliases"),
    reference_id_key: Some("reference_id"),
    cascade: &[
        CascadeField::ReferenceId,
        CascadeField::DisplayName,
        CascadeField::LongName,
        CascadeField::ShortName,
        CascadeField::Alias,
    ],
};

const CATALOG_B_SCHEMA: SourceSchema = SourceSchema {
    id_key: "org_id",
    display_name_key: "name",
    long_name_key: Some("long_name"),
    short_name_key: Some("short_name"),
    abbreviation_key: Some("abbreviation"),
    alias_key: Some("alias"),
    reference_id_key: None,
    cascade: &[
        CascadeField::Abbreviation,
        CascadeField::DisplayName,
        CascadeField::LongName,
        CascadeField::ShortName,
        CascadeField::Alias,
    ],
};

impl Source {
    pub const ALL: [Source; 2] = [Source::CatalogA, Source::CatalogB];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::CatalogA => "catalog_a",
            Source::CatalogB => "catalog_b",
        }
    }

    /// Parses the loosely typed `source` value of a queue item.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "catalog_a" => Ok(Source::CatalogA),
            "catalog_b" => Ok(Source::CatalogB),
            other => Err(ReconcileError::UnsupportedSource(other.to_string())),
        }
    }

    pub fn schema(&self) -> &'static SourceSchema {
        match self {
            Source::CatalogA => &CATALOG_A_SCHEMA,
            Source::CatalogB => &CATALOG_B_SCHEMA,
        }
    }

    /// Ordered list of attributes tried by the exact matcher.
    pub fn field_cascade(&self) -> Result<&'static [CascadeField]> {
        let cascade = self.schema().cascade;
        if cascade.is_empty() {
            return Err(ReconcileError::MissingCascade(*self));
        }
        Ok(cascade)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self> {
        Source::parse(s)
    }
}

impl CascadeField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CascadeField::ReferenceId => "reference_id",
            CascadeField::Abbreviation => "abbreviation",
            CascadeField::DisplayName => "display_name",
            CascadeField::LongName => "long_name",
            CascadeField::ShortName => "short_name",
            CascadeField::Alias => "alias",
        }
    }

    /// Registry attribute an external value is compared against.
    pub fn canonical_field(&self) -> CanonicalField {
        match self {
            CascadeField::ReferenceId => CanonicalField::ReferenceId,
            CascadeField::Abbreviation | CascadeField::ShortName => CanonicalField::ShortName,
            CascadeField::DisplayName => CanonicalField::DisplayName,
            CascadeField::LongName => CanonicalField::LongName,
            CascadeField::Alias => CanonicalField::Alias,
        }
    }

    /// Name-like values get noise stripping before lookup; identifiers do not.
    pub fn is_name(&self) -> bool {
        !matches!(self, CascadeField::ReferenceId)
    }
}

impl CanonicalField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::Id => "id",
            CanonicalField::ReferenceId => "external_reference_ids",
            CanonicalField::DisplayName => "display_name",
            CanonicalField::LongName => "long_name",
            CanonicalField::ShortName => "short_name",
            CanonicalField::Alias => "aliases",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "id" => Some(CanonicalField::Id),
            "external_reference_ids" => Some(CanonicalField::ReferenceId),
            "display_name" => Some(CanonicalField::DisplayName),
            "long_name" => Some(CanonicalField::LongName),
            "short_name" => Some(CanonicalField::ShortName),
            "aliases" => Some(CanonicalField::Alias),
            _ => None,
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
