//! Data models for catalogue assembly

/// Declares a fieldless enum stored as an upper-case code in the database.
///
/// Generates `as_str`, `Display` and `FromStr` with matching codes.
macro_rules! db_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $code:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $code)] $variant ),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $code ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = catalogue_common::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $( $code => Ok($name::$variant), )+
                    other => Err(catalogue_common::Error::InvalidInput(format!(
                        "Unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

pub mod decision;
pub mod name_usage;
pub mod sector;
pub mod sector_import;
pub mod user;

pub use decision::{DecisionMode, EditorialDecision};
pub use name_usage::{Distribution, Name, NameType, NameUsage, Rank, SimpleName, TaxonomicStatus, VernacularName};
pub use sector::{Sector, SectorMode};
pub use sector_import::{ImportState, JobKind, SectorImport, StateTransition};
pub use user::User;
