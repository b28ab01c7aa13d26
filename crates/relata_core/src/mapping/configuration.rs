//! Validated mapping configuration.

use super::definition::{ClassDefinition, PropertyDefinition, RelationPropertyDefinition};
use super::sort::SortExpression;
use super::MappingError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

#[derive(Debug, Deserialize)]
struct MappingDocument {
    classes: Vec<ClassDefinition>,
}

/// Class view with inherited members flattened in (base members first).
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedClass {
    pub name: String,
    /// The class itself followed by its base classes, nearest first.
    pub ancestors: Vec<String>,
    pub properties: Vec<PropertyDefinition>,
    pub relations: Vec<RelationPropertyDefinition>,
}

impl ResolvedClass {
    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|property| property.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationPropertyDefinition> {
        self.relations.iter().find(|relation| relation.name == name)
    }
}

/// Immutable, validated set of mapped classes.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingConfiguration {
    classes: BTreeMap<String, ResolvedClass>,
}

impl MappingConfiguration {
    /// Validates and resolves class definitions.
    ///
    /// # Errors
    /// - Identifier, duplicate, inheritance and relation consistency violations.
    pub fn build(definitions: Vec<ClassDefinition>) -> Result<Self, MappingError> {
        let mut by_name = BTreeMap::<String, ClassDefinition>::new();
        for definition in definitions {
            validate_identifiers(&definition)?;
            if by_name.contains_key(&definition.name) {
                return Err(MappingError::DuplicateClass(definition.name));
            }
            by_name.insert(definition.name.clone(), definition);
        }

        let mut classes = BTreeMap::new();
        for name in by_name.keys() {
            let resolved = resolve_class(name, &by_name)?;
            classes.insert(name.clone(), resolved);
        }

        let configuration = Self { classes };
        for definition in by_name.values() {
            configuration.validate_class(definition)?;
        }

        Ok(configuration)
    }

    /// Parses `{ "classes": [...] }` JSON and validates it.
    pub fn from_json(json: &str) -> Result<Self, MappingError> {
        let document: MappingDocument = serde_json::from_str(json)?;
        Self::build(document.classes)
    }

    pub fn class(&self, name: &str) -> Option<&ResolvedClass> {
        self.classes.get(name)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn property(&self, class: &str, name: &str) -> Option<&PropertyDefinition> {
        self.class(class)?.property(name)
    }

    pub fn relation(&self, class: &str, name: &str) -> Option<&RelationPropertyDefinition> {
        self.class(class)?.relation(name)
    }

    /// Returns the opposite side of `class.relation`, if bidirectional.
    pub fn opposite(&self, class: &str, relation: &str) -> Option<&RelationPropertyDefinition> {
        let definition = self.relation(class, relation)?;
        let opposite = definition.opposite.as_deref()?;
        self.relation(&definition.target_class, opposite)
    }

    /// Whether an instance of `actual` may be stored where `target` is declared.
    pub fn is_assignable(&self, target: &str, actual: &str) -> bool {
        self.class(actual)
            .map(|class| class.ancestors.iter().any(|ancestor| ancestor == target))
            .unwrap_or(false)
    }

    /// `class` itself plus every class deriving from it.
    pub fn derived_classes(&self, class: &str) -> Vec<String> {
        self.classes
            .values()
            .filter(|candidate| candidate.ancestors.iter().any(|ancestor| ancestor == class))
            .map(|candidate| candidate.name.clone())
            .collect()
    }

    fn validate_class(&self, definition: &ClassDefinition) -> Result<(), MappingError> {
        for property in &definition.properties {
            let default_ok = property
                .default
                .as_ref()
                .map_or(true, |value| property.accepts(value));
            if !default_ok {
                return Err(MappingError::InvalidDefault {
                    class: definition.name.clone(),
                    property: property.name.clone(),
                });
            }
        }

        for relation in &definition.relations {
            self.validate_relation(&definition.name, relation)?;
        }
        Ok(())
    }

    fn validate_relation(
        &self,
        class: &str,
        relation: &RelationPropertyDefinition,
    ) -> Result<(), MappingError> {
        let unsupported = |details: &'static str| MappingError::UnsupportedRelation {
            class: class.to_string(),
            property: relation.name.clone(),
            details,
        };

        let target = self.class(&relation.target_class).ok_or_else(|| {
            MappingError::UnknownTargetClass {
                class: class.to_string(),
                property: relation.name.clone(),
                target_class: relation.target_class.clone(),
            }
        })?;

        if relation.is_many() && relation.is_real() {
            return Err(unsupported("a collection side cannot hold the foreign key"));
        }
        if relation.is_many() && !relation.is_bidirectional() {
            return Err(unsupported("collection relations must be bidirectional"));
        }
        if relation.is_virtual() && !relation.is_bidirectional() {
            return Err(unsupported("a virtual side requires an opposite"));
        }
        if relation.read_only && !relation.is_many() {
            return Err(unsupported("only collections can be read-only"));
        }

        if let Some(expression) = &relation.sort_expression {
            let invalid = || MappingError::InvalidSortExpression {
                class: class.to_string(),
                property: relation.name.clone(),
                expression: expression.clone(),
            };
            if !relation.is_many() {
                return Err(invalid());
            }
            let parsed = SortExpression::parse(expression).ok_or_else(invalid)?;
            let all_known = parsed
                .specifications()
                .iter()
                .all(|spec| target.property(&spec.property).is_some());
            if !all_known {
                return Err(invalid());
            }
        }

        let Some(opposite_name) = relation.opposite.as_deref() else {
            return Ok(());
        };
        let opposite = target
            .relation(opposite_name)
            .ok_or_else(|| MappingError::UnknownOpposite {
                class: class.to_string(),
                property: relation.name.clone(),
                opposite: opposite_name.to_string(),
            })?;

        let mismatch = |details: String| MappingError::OppositeMismatch {
            class: class.to_string(),
            property: relation.name.clone(),
            details,
        };
        if opposite.opposite.as_deref() != Some(relation.name.as_str()) {
            return Err(mismatch(format!(
                "opposite `{}.{}` does not point back",
                relation.target_class, opposite.name
            )));
        }
        if !self.is_assignable(&opposite.target_class, class) {
            return Err(mismatch(format!(
                "opposite `{}.{}` targets `{}`",
                relation.target_class, opposite.name, opposite.target_class
            )));
        }
        if relation.is_many() && opposite.is_many() {
            return Err(unsupported("many-to-many relations"));
        }
        if relation.is_real() == opposite.is_real() {
            return Err(mismatch(
                "exactly one side must hold the foreign key".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_identifiers(definition: &ClassDefinition) -> Result<(), MappingError> {
    let mut names: Vec<&str> = vec![definition.name.as_str()];
    names.extend(definition.base_class.as_deref());
    names.extend(definition.properties.iter().map(|p| p.name.as_str()));
    for relation in &definition.relations {
        names.push(relation.name.as_str());
        names.push(relation.target_class.as_str());
        names.extend(relation.opposite.as_deref());
    }

    match names.into_iter().find(|name| !IDENTIFIER_RE.is_match(name)) {
        Some(invalid) => Err(MappingError::InvalidIdentifier(invalid.to_string())),
        None => Ok(()),
    }
}

fn resolve_class(
    name: &str,
    by_name: &BTreeMap<String, ClassDefinition>,
) -> Result<ResolvedClass, MappingError> {
    let mut chain: Vec<&ClassDefinition> = Vec::new();
    let mut seen = BTreeSet::new();
    let mut cursor = by_name.get(name);

    while let Some(definition) = cursor {
        if !seen.insert(definition.name.as_str()) {
            return Err(MappingError::InheritanceCycle(name.to_string()));
        }
        chain.push(definition);
        cursor = match definition.base_class.as_deref() {
            Some(base) => Some(by_name.get(base).ok_or_else(|| MappingError::UnknownBaseClass {
                class: definition.name.clone(),
                base_class: base.to_string(),
            })?),
            None => None,
        };
    }

    let mut member_names = BTreeSet::new();
    let mut properties = Vec::new();
    let mut relations = Vec::new();
    for definition in chain.iter().rev() {
        for property in &definition.properties {
            if !member_names.insert(property.name.clone()) {
                return Err(MappingError::DuplicateProperty {
                    class: name.to_string(),
                    property: property.name.clone(),
                });
            }
            properties.push(property.clone());
        }
        for relation in &definition.relations {
            if !member_names.insert(relation.name.clone()) {
                return Err(MappingError::DuplicateProperty {
                    class: name.to_string(),
                    property: relation.name.clone(),
                });
            }
            relations.push(relation.clone());
        }
    }

    Ok(ResolvedClass {
        name: name.to_string(),
        ancestors: chain.iter().map(|definition| definition.name.clone()).collect(),
        properties,
        relations,
    })
}
