//! Name usages: the nodes of source trees and of the managed catalogue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

db_enum! {
    /// Taxonomic rank, declared from highest to lowest
    #[derive(PartialOrd, Ord)]
    pub enum Rank {
        Kingdom => "KINGDOM",
        Phylum => "PHYLUM",
        Class => "CLASS",
        Order => "ORDER",
        Family => "FAMILY",
        Subfamily => "SUBFAMILY",
        Tribe => "TRIBE",
        Genus => "GENUS",
        Subgenus => "SUBGENUS",
        Species => "SPECIES",
        Subspecies => "SUBSPECIES",
        Variety => "VARIETY",
        Form => "FORM",
        Unranked => "UNRANKED",
    }
}

db_enum! {
    /// Nomenclatural kind of a name
    pub enum NameType {
        Scientific => "SCIENTIFIC",
        Virus => "VIRUS",
        HybridFormula => "HYBRID_FORMULA",
        Informal => "INFORMAL",
        Otu => "OTU",
        Placeholder => "PLACEHOLDER",
        NoName => "NO_NAME",
    }
}

impl NameType {
    /// Whether usages of this name type are copied into the catalogue.
    ///
    /// Placeholders, missing names, hybrid formulas and informal names are
    /// skipped; their children attach to the nearest copied ancestor.
    pub fn is_copyable(&self) -> bool {
        !matches!(
            self,
            NameType::Placeholder | NameType::NoName | NameType::HybridFormula | NameType::Informal
        )
    }
}

db_enum! {
    pub enum TaxonomicStatus {
        Accepted => "ACCEPTED",
        ProvisionallyAccepted => "PROVISIONALLY_ACCEPTED",
        Synonym => "SYNONYM",
        AmbiguousSynonym => "AMBIGUOUS_SYNONYM",
        Misapplied => "MISAPPLIED",
    }
}

impl TaxonomicStatus {
    pub fn is_synonym(&self) -> bool {
        matches!(
            self,
            TaxonomicStatus::Synonym | TaxonomicStatus::AmbiguousSynonym | TaxonomicStatus::Misapplied
        )
    }
}

/// A parsed scientific name as carried by a usage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name {
    pub scientific_name: String,
    pub authorship: Option<String>,
    pub rank: Rank,
    pub name_type: NameType,
}

impl Name {
    pub fn new(scientific_name: impl Into<String>, rank: Rank) -> Self {
        Self {
            scientific_name: scientific_name.into(),
            authorship: None,
            rank,
            name_type: NameType::Scientific,
        }
    }

    pub fn with_authorship(mut self, authorship: impl Into<String>) -> Self {
        self.authorship = Some(authorship.into());
        self
    }

    pub fn with_type(mut self, name_type: NameType) -> Self {
        self.name_type = name_type;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VernacularName {
    pub name: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub area: String,
    pub status: Option<String>,
}

/// A node of a taxonomic tree: a name used as accepted taxon or synonym.
///
/// Catalogue copies carry `sector_key`, `source_id`, `sync_attempt` and
/// `synced_at`; source usages leave them empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameUsage {
    pub id: String,
    pub dataset_key: i32,
    pub parent_id: Option<String>,
    pub ordinal: i32,
    pub name: Name,
    pub status: TaxonomicStatus,
    pub extinct: Option<bool>,
    pub reference_citations: Vec<String>,
    pub vernacular_names: Vec<VernacularName>,
    pub distributions: Vec<Distribution>,
    pub sector_key: Option<i32>,
    pub source_id: Option<String>,
    pub sync_attempt: Option<i32>,
    pub synced_at: Option<DateTime<Utc>>,
    pub modified_by: Option<i32>,
}

impl NameUsage {
    /// New accepted usage without parent
    pub fn new(dataset_key: i32, id: impl Into<String>, name: Name) -> Self {
        Self {
            id: id.into(),
            dataset_key,
            parent_id: None,
            ordinal: 0,
            name,
            status: TaxonomicStatus::Accepted,
            extinct: None,
            reference_citations: Vec::new(),
            vernacular_names: Vec::new(),
            distributions: Vec::new(),
            sector_key: None,
            source_id: None,
            sync_attempt: None,
            synced_at: None,
            modified_by: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_ordinal(mut self, ordinal: i32) -> Self {
        self.ordinal = ordinal;
        self
    }

    pub fn with_status(mut self, status: TaxonomicStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_synonym(&self) -> bool {
        self.status.is_synonym()
    }

    /// Fingerprint of this usage, keeping its id
    pub fn to_simple_name(&self) -> SimpleName {
        SimpleName {
            id: Some(self.id.clone()),
            name: self.name.scientific_name.clone(),
            authorship: self.name.authorship.clone(),
            rank: Some(self.name.rank),
        }
    }
}

/// Name fingerprint anchoring sectors and decisions.
///
/// The `id` is a resolved pointer into a tree and may be absent; name,
/// authorship and rank survive tree rebuilds and allow rematching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleName {
    pub id: Option<String>,
    pub name: String,
    pub authorship: Option<String>,
    pub rank: Option<Rank>,
}

impl SimpleName {
    pub fn new(name: impl Into<String>, authorship: Option<&str>, rank: Option<Rank>) -> Self {
        Self {
            id: None,
            name: name.into(),
            authorship: authorship.map(str::to_string),
            rank,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.id.is_some()
    }
}

impl fmt::Display for SimpleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(authorship) = self.authorship.as_deref().filter(|a| !a.is_empty()) {
            write!(f, " {}", authorship)?;
        }
        if let Some(rank) = self.rank {
            write!(f, " [{}]", rank.as_str().to_ascii_lowercase())?;
        }
        Ok(())
    }
}
