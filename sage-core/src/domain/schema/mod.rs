// sage-core/src/domain/schema/mod.rs
//
// The loaded Schema is an arena: flat arrays of catalogs and packages,
// cross-referenced through integer handles. Read-only after loading;
// many workers share one instance behind an Arc.

pub mod catalog;
pub mod package;
pub mod sender;

pub use catalog::{Catalog, CatalogFileFormat, FieldRule, FieldSpec, FieldType, RuleCheck};
pub use package::{
    ArchiveFormat, CatalogRef, Connection, CrossRule, Destination, Driver, InsertionMethod,
    Package, PackageFileFormat, PreValidation, RefSource,
};
pub use sender::{Cadence, Channel, Deadline, Sender, SenderRoster, SubmissionFrequency};

use crate::domain::error::DomainError;

/// Index of a catalog inside `Schema::catalogs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CatalogHandle(pub(crate) usize);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub catalogs: Vec<Catalog>,
    pub packages: Vec<Package>,
    pub roster: Option<SenderRoster>,
}

impl Schema {
    pub fn catalog(&self, handle: CatalogHandle) -> &Catalog {
        // Handles are only minted by the Loader, which owns the arena;
        // an out-of-range handle is a construction bug.
        &self.catalogs[handle.0]
    }

    pub fn push_catalog(&mut self, catalog: Catalog) -> CatalogHandle {
        self.catalogs.push(catalog);
        CatalogHandle(self.catalogs.len() - 1)
    }

    pub fn package(&self, name: &str) -> Result<&Package, DomainError> {
        self.packages
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| DomainError::PackageNotFound(name.to_string()))
    }

    pub fn sender(&self, sender_id: &str) -> Option<&Sender> {
        self.roster.as_ref().and_then(|r| r.sender(sender_id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_resolve_through_arena() {
        let mut schema = Schema::default();
        let catalog: Catalog = serde_yaml::from_str(
            "name: ventas\nfields:\n  - name: total\n    type: number\n",
        )
        .unwrap();
        let handle = schema.push_catalog(catalog);
        assert_eq!(schema.catalog(handle).name, "ventas");
    }

    #[test]
    fn test_unknown_package_is_domain_error() {
        let schema = Schema::default();
        assert!(matches!(
            schema.package("nope"),
            Err(DomainError::PackageNotFound(_))
        ));
    }
}
