//! Document translator: Datalog-style query maps.
//!
//! Conditions become a tree of [`Clause`] values over namespaced document
//! attributes. The tree is plain data, serialisable as JSON and printable in
//! an EDN-like form for logs:
//!
//! ```text
//! {:find entity
//!  :where [(visible :current)
//!          (in :instance/type-name #{"Table"})
//!          (property "name" (= "Ann"))]}
//! ```
//!
//! Evaluation against stored documents lives with the store in
//! [`crate::storage::document`].

use super::{
    Conditions, LeafTest, Operand, PropertyPredicate, QueryTranslator, TextTest, lower_properties,
    lower_text, require_target,
};
use crate::models::{Guid, InstanceKind, MatchCriteria, SequencingOrder, Snapshot};
use crate::regex_guard::RegexGuard;
use crate::types::TypeRegistry;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Document attributes addressable from a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocAttribute {
    /// Instance GUID.
    Guid,
    /// Type name (classification name for classifications).
    TypeName,
    /// Lifecycle status.
    Status,
    /// First relationship end.
    End1Guid,
    /// Second relationship end.
    End2Guid,
}

impl DocAttribute {
    /// Namespaced keyword.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Guid => ":instance/guid",
            Self::TypeName => ":instance/type-name",
            Self::Status => ":instance/status",
            Self::End1Guid => ":relationship/end1",
            Self::End2Guid => ":relationship/end2",
        }
    }
}

/// One clause of a query map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "clause", rename_all = "snake_case")]
pub enum Clause {
    /// Attribute takes one of the listed values; an empty list never holds.
    In {
        /// Attribute.
        attribute: DocAttribute,
        /// Accepted values.
        values: Vec<String>,
    },
    /// Document version is visible under the snapshot.
    Visible {
        /// Snapshot.
        snapshot: Snapshot,
    },
    /// Test on the flattened property rows at `path`.
    Property {
        /// Dotted path.
        path: String,
        /// Test.
        test: LeafTest,
    },
    /// Some string property matches.
    Text {
        /// Literal or pattern.
        test: TextTest,
    },
    /// A visible classification named `name` satisfies `clauses`.
    Classified {
        /// Classification name.
        name: String,
        /// Conditions on the classification document.
        clauses: Vec<Self>,
    },
    /// Relationship has the entity at either end.
    EitherEnd {
        /// Entity GUID.
        guid: Guid,
    },
    /// Conjunction; empty is true.
    And {
        /// Children.
        clauses: Vec<Self>,
    },
    /// Disjunction; empty is false.
    Or {
        /// Children.
        clauses: Vec<Self>,
    },
    /// Negation.
    Not {
        /// Child.
        #[serde(rename = "operand")]
        clause: Box<Self>,
    },
}

impl Clause {
    /// Conjunction.
    #[must_use]
    pub const fn and(clauses: Vec<Self>) -> Self {
        Self::And { clauses }
    }

    /// Disjunction.
    #[must_use]
    pub const fn or(clauses: Vec<Self>) -> Self {
        Self::Or { clauses }
    }

    /// Negation.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not {
            clause: Box::new(self),
        }
    }

    fn combine(criteria: MatchCriteria, clauses: Vec<Self>) -> Self {
        match criteria {
            MatchCriteria::All => Self::and(clauses),
            MatchCriteria::Any => Self::or(clauses),
            MatchCriteria::None => Self::and(clauses.into_iter().map(Self::negate).collect()),
        }
    }

    fn from_predicate(tree: PropertyPredicate) -> Self {
        match tree {
            PropertyPredicate::Leaf { path, test } => Self::Property { path, test },
            PropertyPredicate::All(children) => {
                Self::and(children.into_iter().map(Self::from_predicate).collect())
            },
            PropertyPredicate::Any(children) => {
                Self::or(children.into_iter().map(Self::from_predicate).collect())
            },
            PropertyPredicate::Not(child) => Self::from_predicate(*child).negate(),
        }
    }
}

fn edn_string(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

fn edn_operand(operand: &Operand) -> String {
    match operand {
        Operand::Boolean(b) => b.to_string(),
        Operand::Number(n) => n.to_string(),
        Operand::Date(d) => format!("#inst {d}"),
        Operand::Text(s) => edn_string(s),
        Operand::Symbol(s) => format!(":{s}"),
    }
}

fn write_all(f: &mut fmt::Formatter<'_>, clauses: &[Clause]) -> fmt::Result {
    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{clause}")?;
    }
    Ok(())
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In { attribute, values } => {
                let values: Vec<String> = values.iter().map(|v| edn_string(v)).collect();
                write!(f, "(in {} #{{{}}})", attribute.keyword(), values.join(" "))
            },
            Self::Visible { snapshot } => match snapshot {
                Snapshot::Current => write!(f, "(visible :current)"),
                Snapshot::AsOf(at) => write!(f, "(visible #inst {})", at.as_millis()),
            },
            Self::Property { path, test } => {
                let test = match test {
                    LeafTest::Present => "present".to_string(),
                    LeafTest::Absent => "absent".to_string(),
                    LeafTest::Equals { operand } => format!("(= {})", edn_operand(operand)),
                    LeafTest::NotEquals { operand } => format!("(not= {})", edn_operand(operand)),
                    LeafTest::Compare { op, operand } => {
                        format!("({} {})", op.symbol(), edn_operand(operand))
                    },
                    LeafTest::Matches { pattern } => format!("(re-matches {})", edn_string(pattern)),
                    LeafTest::NotMatches { pattern } => {
                        format!("(not (re-matches {}))", edn_string(pattern))
                    },
                };
                write!(f, "(property {} {test})", edn_string(path))
            },
            Self::Text { test } => match test {
                TextTest::Literal(text) => write!(f, "(text (= {}))", edn_string(text)),
                TextTest::Pattern(pattern) => {
                    write!(f, "(text (re-matches {}))", edn_string(pattern))
                },
            },
            Self::Classified { name, clauses } => {
                write!(f, "(classified {} [", edn_string(name))?;
                write_all(f, clauses)?;
                write!(f, "])")
            },
            Self::EitherEnd { guid } => write!(f, "(either-end {})", edn_string(guid.as_str())),
            Self::And { clauses } => {
                write!(f, "(and ")?;
                write_all(f, clauses)?;
                write!(f, ")")
            },
            Self::Or { clauses } => {
                write!(f, "(or ")?;
                write_all(f, clauses)?;
                write!(f, ")")
            },
            Self::Not { clause } => write!(f, "(not {clause})"),
        }
    }
}

/// A complete query map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatalogQuery {
    /// Instance kind returned.
    pub find: InstanceKind,
    /// Conditions every result satisfies.
    pub where_clause: Clause,
    /// Result order.
    pub order: SequencingOrder,
}

impl DatalogQuery {
    /// Creates a query map.
    #[must_use]
    pub const fn new(find: InstanceKind, where_clause: Clause, order: SequencingOrder) -> Self {
        Self {
            find,
            where_clause,
            order,
        }
    }
}

impl fmt::Display for DatalogQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{:find {} :where {} :order {:?}}}",
            self.find, self.where_clause, self.order
        )
    }
}

/// Renders conditions into [`Clause`] trees.
#[derive(Debug, Clone, Copy)]
pub struct DatalogTranslator<'a> {
    types: &'a TypeRegistry,
    guard: RegexGuard,
    snapshot: Snapshot,
}

impl<'a> DatalogTranslator<'a> {
    /// Creates a translator; `snapshot` governs classification visibility.
    #[must_use]
    pub const fn new(types: &'a TypeRegistry, guard: RegexGuard, snapshot: Snapshot) -> Self {
        Self {
            types,
            guard,
            snapshot,
        }
    }
}

impl QueryTranslator for DatalogTranslator<'_> {
    type Fragment = Clause;

    fn render(&self, conditions: Conditions<'_>, target: InstanceKind) -> Result<Clause> {
        match conditions {
            Conditions::Properties(properties) => Ok(Clause::from_predicate(lower_properties(
                properties,
                &self.guard,
            )?)),
            Conditions::Classifications(classifications) => {
                require_target("classification", target, &[InstanceKind::Entity])?;
                let mut clauses = Vec::with_capacity(classifications.conditions.len());
                for condition in &classifications.conditions {
                    let mut inner = vec![Clause::Visible {
                        snapshot: self.snapshot,
                    }];
                    if let Some(properties) = &condition.properties {
                        inner.push(Clause::from_predicate(lower_properties(
                            properties,
                            &self.guard,
                        )?));
                    }
                    clauses.push(Clause::Classified {
                        name: condition.name.clone(),
                        clauses: inner,
                    });
                }
                Ok(Clause::combine(classifications.match_criteria, clauses))
            },
            Conditions::Types(filter) => Ok(Clause::In {
                attribute: DocAttribute::TypeName,
                values: self
                    .types
                    .resolve(filter, target.into())?
                    .into_iter()
                    .collect(),
            }),
            Conditions::Status(filter) => Ok(Clause::In {
                attribute: DocAttribute::Status,
                values: filter
                    .accepted()
                    .into_iter()
                    .map(|s| s.as_str().to_string())
                    .collect(),
            }),
            Conditions::AsOf(snapshot) => Ok(Clause::Visible { snapshot }),
            Conditions::Text(pattern) => Ok(Clause::Text {
                test: lower_text(pattern, &self.guard)?,
            }),
            Conditions::EndEntity(guid) => {
                require_target("end entity", target, &[InstanceKind::Relationship])?;
                Ok(Clause::EitherEnd { guid: guid.clone() })
            },
        }
    }

    fn conjoin(&self, fragments: Vec<Clause>) -> Clause {
        Clause::and(fragments)
    }
}
