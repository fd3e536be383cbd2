//! Type-definition subset needed to translate searches.
//!
//! Only names, categories and the supertype link are tracked. Type filters
//! are expanded to the closed transitive subtype set because instances of
//! many concrete subtypes share the same storage columns.

use crate::models::{InstanceKind, TypeFilter};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Which kind of instance a type describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeCategory {
    /// Entity type.
    Entity,
    /// Relationship type.
    Relationship,
    /// Classification type.
    Classification,
}

impl From<InstanceKind> for TypeCategory {
    fn from(kind: InstanceKind) -> Self {
        match kind {
            InstanceKind::Entity => Self::Entity,
            InstanceKind::Relationship => Self::Relationship,
            InstanceKind::Classification => Self::Classification,
        }
    }
}

/// Summary of one type definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefSummary {
    /// Type GUID.
    pub guid: String,
    /// Unique type name.
    pub name: String,
    /// Instance category.
    pub category: TypeCategory,
    /// Direct supertype GUID, if any.
    pub supertype: Option<String>,
}

impl TypeDefSummary {
    /// Creates a root type.
    #[must_use]
    pub fn new(guid: impl Into<String>, name: impl Into<String>, category: TypeCategory) -> Self {
        Self {
            guid: guid.into(),
            name: name.into(),
            category,
            supertype: None,
        }
    }

    /// Sets the direct supertype.
    #[must_use]
    pub fn with_supertype(mut self, supertype_guid: impl Into<String>) -> Self {
        self.supertype = Some(supertype_guid.into());
        self
    }
}

#[derive(Debug, Default)]
struct TypeIndex {
    by_guid: HashMap<String, TypeDefSummary>,
    guid_by_name: HashMap<String, String>,
    subtypes: HashMap<String, Vec<String>>,
}

/// Registry of known types, shared between the gateway and translators.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    index: RwLock<TypeIndex>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from definitions listed supertypes first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeError`] for duplicates or dangling supertypes.
    pub fn with_types(types: impl IntoIterator<Item = TypeDefSummary>) -> Result<Self> {
        let registry = Self::new();
        for def in types {
            registry.register(def)?;
        }
        Ok(registry)
    }

    fn read(&self) -> RwLockReadGuard<'_, TypeIndex> {
        self.index.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Type registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, TypeIndex> {
        self.index.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Type registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Registers a type definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeError`] if the GUID or name is taken, or the
    /// supertype is unknown or belongs to another category.
    pub fn register(&self, def: TypeDefSummary) -> Result<()> {
        let mut index = self.write();
        if index.by_guid.contains_key(&def.guid) || index.guid_by_name.contains_key(&def.name) {
            return Err(type_error(&def.name, "type is already registered"));
        }
        if let Some(parent) = &def.supertype {
            let Some(parent_def) = index.by_guid.get(parent) else {
                return Err(type_error(parent, "supertype is not registered"));
            };
            if parent_def.category != def.category {
                return Err(type_error(
                    &def.name,
                    "supertype belongs to a different category",
                ));
            }
            index
                .subtypes
                .entry(parent.clone())
                .or_default()
                .push(def.guid.clone());
        }
        index
            .guid_by_name
            .insert(def.name.clone(), def.guid.clone());
        index.by_guid.insert(def.guid.clone(), def);
        Ok(())
    }

    /// Looks up a type by GUID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeError`] if the GUID is unknown.
    pub fn get(&self, guid: &str) -> Result<TypeDefSummary> {
        self.read()
            .by_guid
            .get(guid)
            .cloned()
            .ok_or_else(|| type_error(guid, "unknown type GUID"))
    }

    /// Looks up a type by name and checks its category.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeError`] if the name is unknown or of another category.
    pub fn by_name(&self, name: &str, category: TypeCategory) -> Result<TypeDefSummary> {
        let index = self.read();
        let def = index
            .guid_by_name
            .get(name)
            .and_then(|guid| index.by_guid.get(guid))
            .ok_or_else(|| type_error(name, "unknown type name"))?;
        if def.category != category {
            return Err(type_error(name, "type belongs to a different category"));
        }
        Ok(def.clone())
    }

    /// Names of `guid` and all of its transitive subtypes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeError`] if the GUID is unknown.
    pub fn subtype_closure(&self, guid: &str) -> Result<BTreeSet<String>> {
        let index = self.read();
        closure(&index, guid)
    }

    /// Names of every registered type in a category.
    #[must_use]
    pub fn category_names(&self, category: TypeCategory) -> BTreeSet<String> {
        self.read()
            .by_guid
            .values()
            .filter(|def| def.category == category)
            .map(|def| def.name.clone())
            .collect()
    }

    /// Returns `true` if `name` equals `ancestor` or is one of its subtypes.
    #[must_use]
    pub fn is_a(&self, name: &str, ancestor: &str) -> bool {
        let index = self.read();
        let mut current = index.guid_by_name.get(name).cloned();
        while let Some(ref guid) = current {
            let Some(def) = index.by_guid.get(guid) else {
                return false;
            };
            if def.name == ancestor {
                return true;
            }
            current.clone_from(&def.supertype);
        }
        false
    }

    /// Expands a type filter to the set of accepted type names.
    ///
    /// Explicit subtypes must lie within the closure of `type_guid` when
    /// both are given. With neither set, every type of `category` is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeError`] for unknown GUIDs, category mismatches or
    /// subtypes outside the requested type.
    pub fn resolve(&self, filter: &TypeFilter, category: TypeCategory) -> Result<BTreeSet<String>> {
        let index = self.read();
        let check = |guid: &str| -> Result<()> {
            match index.by_guid.get(guid) {
                Some(def) if def.category == category => Ok(()),
                Some(_) => Err(type_error(guid, "type belongs to a different category")),
                None => Err(type_error(guid, "unknown type GUID")),
            }
        };

        let base = match &filter.type_guid {
            Some(guid) => {
                check(guid)?;
                Some(closure(&index, guid)?)
            },
            None => None,
        };

        if !filter.subtype_guids.is_empty() {
            let mut names = BTreeSet::new();
            for subtype in &filter.subtype_guids {
                check(subtype)?;
                let expanded = closure(&index, subtype)?;
                if let Some(base) = &base
                    && !expanded.is_subset(base)
                {
                    return Err(type_error(subtype, "not a subtype of the requested type"));
                }
                names.extend(expanded);
            }
            return Ok(names);
        }

        Ok(base.unwrap_or_else(|| {
            index
                .by_guid
                .values()
                .filter(|def| def.category == category)
                .map(|def| def.name.clone())
                .collect()
        }))
    }
}

fn closure(index: &TypeIndex, guid: &str) -> Result<BTreeSet<String>> {
    let root = index
        .by_guid
        .get(guid)
        .ok_or_else(|| type_error(guid, "unknown type GUID"))?;

    let mut names = BTreeSet::from([root.name.clone()]);
    let mut queue: VecDeque<&str> = VecDeque::from([guid]);
    while let Some(current) = queue.pop_front() {
        for child in index.subtypes.get(current).into_iter().flatten() {
            if let Some(def) = index.by_guid.get(child)
                && names.insert(def.name.clone())
            {
                queue.push_back(child);
            }
        }
    }
    Ok(names)
}

fn type_error(type_ref: &str, reason: &str) -> Error {
    Error::TypeError {
        type_ref: type_ref.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        TypeRegistry::with_types([
            TypeDefSummary::new("t-ref", "Referenceable", TypeCategory::Entity),
            TypeDefSummary::new("t-asset", "Asset", TypeCategory::Entity).with_supertype("t-ref"),
            TypeDefSummary::new("t-table", "Table", TypeCategory::Entity).with_supertype("t-asset"),
            TypeDefSummary::new("t-file", "File", TypeCategory::Entity).with_supertype("t-asset"),
            TypeDefSummary::new("t-person", "Person", TypeCategory::Entity)
                .with_supertype("t-ref"),
            TypeDefSummary::new("t-link", "Link", TypeCategory::Relationship),
        ])
        .unwrap()
    }

    #[test]
    fn test_subtype_closure_is_transitive() {
        let names = registry().subtype_closure("t-ref").unwrap();
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["Asset", "File", "Person", "Referenceable", "Table"]
        );
    }

    #[test]
    fn test_resolve_without_type_unions_category() {
        let names = registry()
            .resolve(&TypeFilter::any(), TypeCategory::Relationship)
            .unwrap();
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["Link"]);
    }

    #[test]
    fn test_resolve_explicit_subtypes() {
        let filter = TypeFilter::of("t-ref").with_subtypes(["t-asset".to_string()]);
        let names = registry().resolve(&filter, TypeCategory::Entity).unwrap();
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["Asset", "File", "Table"]
        );
    }

    #[test]
    fn test_resolve_rejects_foreign_subtype() {
        let filter = TypeFilter::of("t-asset").with_subtypes(["t-person".to_string()]);
        assert!(matches!(
            registry().resolve(&filter, TypeCategory::Entity),
            Err(Error::TypeError { .. })
        ));
    }

    #[test]
    fn test_unknown_and_miscategorised_types() {
        let reg = registry();
        assert!(matches!(
            reg.resolve(&TypeFilter::of("nope"), TypeCategory::Entity),
            Err(Error::TypeError { .. })
        ));
        assert!(reg.resolve(&TypeFilter::of("t-link"), TypeCategory::Entity).is_err());
        assert!(reg.by_name("Link", TypeCategory::Entity).is_err());
    }

    #[test]
    fn test_register_rejects_duplicates_and_orphans() {
        let reg = registry();
        assert!(reg
            .register(TypeDefSummary::new("t-x", "Person", TypeCategory::Entity))
            .is_err());
        assert!(reg
            .register(TypeDefSummary::new("t-y", "Y", TypeCategory::Entity).with_supertype("t-z"))
            .is_err());
    }

    #[test]
    fn test_is_a() {
        let reg = registry();
        assert!(reg.is_a("Table", "Referenceable"));
        assert!(reg.is_a("Table", "Table"));
        assert!(!reg.is_a("Person", "Asset"));
    }
}
