//! Evaluates query maps against stored documents.
//!
//! Leaf tests follow the same value-type families as the relational
//! backend: numbers compare only against `int`/`float` rows, dates only
//! against `date` rows, symbols only against enum rows, patterns only
//! against `string` rows.

use super::{Document, Documents, classification_reference};
use crate::models::FlatProperty;
use crate::query::{Clause, DocAttribute, LeafTest, Operand, RangeOp, TextTest};
use crate::regex_guard::RegexGuard;
use crate::Result;
use regex::Regex;
use std::cell::RefCell;
use std::collections::HashMap;

/// Evaluates clauses over one consistent view of the store.
pub struct Evaluator<'s> {
    documents: &'s Documents,
    guard: RegexGuard,
    patterns: RefCell<HashMap<String, Regex>>,
}

impl<'s> Evaluator<'s> {
    /// Creates an evaluator over a locked view of the store.
    pub fn new(documents: &'s Documents, guard: RegexGuard) -> Self {
        Self {
            documents,
            guard,
            patterns: RefCell::new(HashMap::new()),
        }
    }

    /// Returns `true` if `clause` holds for `document`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::BadSearchProperty`] if a pattern cannot be built.
    pub fn holds(&self, clause: &Clause, document: &Document) -> Result<bool> {
        match clause {
            Clause::In { attribute, values } => Ok(attribute_value(document, *attribute)
                .is_some_and(|value| values.iter().any(|v| v == value))),
            Clause::Visible { snapshot } => Ok(document.header().visible(*snapshot)),
            Clause::Property { path, test } => self.leaf(document.rows_at(path), path, test),
            Clause::Text { test } => {
                for row in document.rows().iter().filter(|r| r.is_string()) {
                    let hit = match test {
                        TextTest::Literal(text) => row.value.as_deref() == Some(text.as_str()),
                        TextTest::Pattern(pattern) => self.matches("*", pattern, row)?,
                    };
                    if hit {
                        return Ok(true);
                    }
                }
                Ok(false)
            },
            Clause::Classified { name, clauses } => {
                let Some(entity) = document.as_entity() else {
                    return Ok(false);
                };
                let reference = classification_reference(&entity.header.guid, name);
                for version in self.documents.get(&reference).into_iter().flatten() {
                    if self.all(clauses, version)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            },
            Clause::EitherEnd { guid } => {
                Ok(document.as_relationship().is_some_and(|r| r.touches(guid)))
            },
            Clause::And { clauses } => self.all(clauses, document),
            Clause::Or { clauses } => {
                for clause in clauses {
                    if self.holds(clause, document)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            },
            Clause::Not { clause } => Ok(!self.holds(clause, document)?),
        }
    }

    fn all(&self, clauses: &[Clause], document: &Document) -> Result<bool> {
        for clause in clauses {
            if !self.holds(clause, document)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn leaf<'r>(
        &self,
        mut rows: impl Iterator<Item = &'r FlatProperty>,
        path: &str,
        test: &LeafTest,
    ) -> Result<bool> {
        match test {
            LeafTest::Present => Ok(rows.next().is_some()),
            LeafTest::Absent => Ok(rows.next().is_none()),
            LeafTest::Equals { operand } => Ok(rows.any(|r| equals(r, operand))),
            LeafTest::NotEquals { operand } => Ok(rows.any(|r| !equals(r, operand))),
            LeafTest::Compare { op, operand } => Ok(rows.any(|r| compare(r, *op, operand))),
            LeafTest::Matches { pattern } => {
                for row in rows {
                    if self.matches(path, pattern, row)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            },
            LeafTest::NotMatches { pattern } => {
                for row in rows {
                    if !self.matches(path, pattern, row)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            },
        }
    }

    /// Full match of a string row; other rows never match.
    fn matches(&self, path: &str, pattern: &str, row: &FlatProperty) -> Result<bool> {
        let Some(value) = row.value.as_deref().filter(|_| row.is_string()) else {
            return Ok(false);
        };
        if let Some(regex) = self.patterns.borrow().get(pattern) {
            return Ok(regex.is_match(value));
        }
        let regex = self.guard.matcher(path, pattern)?;
        let hit = regex.is_match(value);
        self.patterns.borrow_mut().insert(pattern.to_string(), regex);
        Ok(hit)
    }
}

fn attribute_value(document: &Document, attribute: DocAttribute) -> Option<&str> {
    let header = document.header();
    match attribute {
        DocAttribute::Guid => Some(header.guid.as_str()),
        DocAttribute::TypeName => Some(&header.type_name),
        DocAttribute::Status => Some(header.status.as_str()),
        DocAttribute::End1Guid => document.as_relationship().map(|r| r.end1.guid.as_str()),
        DocAttribute::End2Guid => document.as_relationship().map(|r| r.end2.guid.as_str()),
    }
}

fn number(row: &FlatProperty) -> Option<f64> {
    matches!(row.value_type.as_str(), "int" | "float")
        .then(|| row.value.as_deref()?.parse().ok())
        .flatten()
}

fn date(row: &FlatProperty) -> Option<i64> {
    (row.value_type == "date")
        .then(|| row.value.as_deref()?.parse().ok())
        .flatten()
}

fn equals(row: &FlatProperty, operand: &Operand) -> bool {
    let value = row.value.as_deref();
    match operand {
        Operand::Boolean(b) => row.value_type == "boolean" && value == Some(&*b.to_string()),
        Operand::Number(n) => number(row).is_some_and(|v| v == *n),
        Operand::Date(d) => date(row) == Some(*d),
        Operand::Text(s) => row.is_string() && value == Some(s.as_str()),
        Operand::Symbol(s) => row.is_enum() && value == Some(s.as_str()),
    }
}

fn compare(row: &FlatProperty, op: RangeOp, operand: &Operand) -> bool {
    match operand {
        Operand::Number(n) => number(row)
            .and_then(|v| v.partial_cmp(n))
            .is_some_and(|ordering| op.holds(ordering)),
        Operand::Date(d) => date(row).is_some_and(|v| op.holds(v.cmp(d))),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        EffectivityWindow, Entity, Guid, InstanceHeader, InstanceProperties, InstanceStatus,
        PropertyValue, StorageWindow, Timestamp,
    };
    use crate::storage::Record;
    use test_case::test_case;

    fn document(properties: InstanceProperties) -> Document {
        let entity = Entity {
            header: InstanceHeader {
                guid: Guid::new("e1"),
                type_guid: "t".to_string(),
                type_name: "Person".to_string(),
                version: 1,
                status: InstanceStatus::Active,
                metadata_collection_id: "mc".to_string(),
                created_by: "u".to_string(),
                updated_by: None,
                create_time: Timestamp::from_millis(0),
                update_time: None,
                effective: EffectivityWindow::unbounded(),
                storage: StorageWindow::open(Timestamp::from_millis(0)),
            },
            properties,
            classifications: Vec::new(),
            is_proxy: false,
        };
        Document::new(Record::Entity(&entity)).unwrap()
    }

    fn person() -> Document {
        document(
            InstanceProperties::new()
                .with("name", "Ann")
                .with("age", 41_i64)
                .with("score", 2.5_f64)
                .with("active", true)
                .with("level", PropertyValue::enumeration(2, "GOLD"))
                .with("born", PropertyValue::date(Timestamp::from_millis(1_000))),
        )
    }

    fn property(path: &str, test: LeafTest) -> Clause {
        Clause::Property {
            path: path.to_string(),
            test,
        }
    }

    fn eval(clause: &Clause) -> bool {
        let documents = Documents::new();
        Evaluator::new(&documents, RegexGuard::default())
            .holds(clause, &person())
            .unwrap()
    }

    #[test_case("name", Operand::Text("Ann".to_string()), true ; "string equal")]
    #[test_case("name", Operand::Text("Anne".to_string()), false ; "string differs")]
    #[test_case("age", Operand::Number(41.0), true ; "int as number")]
    #[test_case("score", Operand::Number(2.5), true ; "float as number")]
    #[test_case("active", Operand::Boolean(true), true ; "boolean")]
    #[test_case("level", Operand::Symbol("GOLD".to_string()), true ; "enum symbol")]
    #[test_case("born", Operand::Date(1_000), true ; "date")]
    #[test_case("age", Operand::Text("41".to_string()), false ; "families do not mix")]
    fn test_equals(path: &str, operand: Operand, expected: bool) {
        assert_eq!(eval(&property(path, LeafTest::Equals { operand })), expected);
    }

    #[test]
    fn test_not_equals_needs_a_row() {
        let operand = Operand::Text("Bob".to_string());
        assert!(eval(&property("name", LeafTest::NotEquals { operand: operand.clone() })));
        assert!(!eval(&property("missing", LeafTest::NotEquals { operand })));
    }

    #[test]
    fn test_compare_and_match() {
        assert!(eval(&property(
            "age",
            LeafTest::Compare {
                op: RangeOp::Gte,
                operand: Operand::Number(41.0)
            }
        )));
        assert!(!eval(&property(
            "name",
            LeafTest::Compare {
                op: RangeOp::Gt,
                operand: Operand::Number(0.0)
            }
        )));
        assert!(eval(&property(
            "name",
            LeafTest::Matches {
                pattern: "A.*".to_string()
            }
        )));
        assert!(!eval(&property(
            "name",
            LeafTest::Matches {
                pattern: "nn".to_string()
            }
        )));
        assert!(eval(&property(
            "age",
            LeafTest::NotMatches {
                pattern: ".*".to_string()
            }
        )));
    }

    #[test]
    fn test_text_searches_strings_only() {
        let text = |pattern: &str| Clause::Text {
            test: TextTest::Pattern(pattern.to_string()),
        };
        assert!(eval(&text("A.n")));
        assert!(!eval(&text("4.")));
    }

    #[test]
    fn test_combinators() {
        let present = property("name", LeafTest::Present);
        let absent = property("name", LeafTest::Absent);
        assert!(eval(&Clause::and(vec![])));
        assert!(!eval(&Clause::or(vec![])));
        assert!(eval(&Clause::or(vec![absent.clone(), present.clone()])));
        assert!(eval(&absent.negate()));
        assert!(eval(&Clause::In {
            attribute: DocAttribute::TypeName,
            values: vec!["Person".to_string()]
        }));
        assert!(!eval(&Clause::In {
            attribute: DocAttribute::End1Guid,
            values: vec!["e1".to_string()]
        }));
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let documents = Documents::new();
        let result = Evaluator::new(&documents, RegexGuard::default()).holds(
            &property(
                "name",
                LeafTest::Matches {
                    pattern: "(".to_string(),
                },
            ),
            &person(),
        );
        assert!(result.is_err());
    }
}
