// src/capability.rs

//! Capabilities, relations and dependency classes
//!
//! A capability is `(target kind, name, relation, edition)`. Unconstrained
//! capabilities are always held as `(Any, None)` in memory; the store writes
//! them with NULL edition columns and the `NONE` relation code.

use crate::error::{Error, Result};
use crate::resolvable::Kind;
use crate::version::Edition;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relation {
    Any,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    None,
}

const REL_LT: u8 = 1;
const REL_EQ: u8 = 2;
const REL_GT: u8 = 4;

impl Relation {
    pub fn as_str(&self) -> &str {
        match self {
            Relation::Any => "",
            Relation::Eq => "=",
            Relation::Ne => "!=",
            Relation::Lt => "<",
            Relation::Le => "<=",
            Relation::Gt => ">",
            Relation::Ge => ">=",
            Relation::None => "NONE",
        }
    }

    /// Code written to the `relation` columns
    pub fn code(&self) -> i32 {
        match self {
            Relation::Any => 0,
            Relation::Eq => 1,
            Relation::Lt => 2,
            Relation::Le => 3,
            Relation::Gt => 4,
            Relation::Ge => 5,
            Relation::Ne => 6,
            Relation::None => 8,
        }
    }

    /// Decode a stored relation; unknown codes read as `None`
    pub fn from_code(code: i64) -> Relation {
        match code {
            0 => Relation::Any,
            1 => Relation::Eq,
            2 => Relation::Lt,
            3 => Relation::Le,
            4 => Relation::Gt,
            5 => Relation::Ge,
            6 => Relation::Ne,
            _ => Relation::None,
        }
    }

    /// Whether this relation constrains the edition at all
    pub fn is_constrained(&self) -> bool {
        !matches!(self, Relation::Any | Relation::None)
    }

    fn bits(&self) -> u8 {
        match self {
            Relation::Eq => REL_EQ,
            Relation::Ne => REL_LT | REL_GT,
            Relation::Lt => REL_LT,
            Relation::Le => REL_LT | REL_EQ,
            Relation::Gt => REL_GT,
            Relation::Ge => REL_GT | REL_EQ,
            Relation::Any | Relation::None => REL_LT | REL_EQ | REL_GT,
        }
    }
}

impl FromStr for Relation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "=" | "==" => Ok(Relation::Eq),
            "!=" => Ok(Relation::Ne),
            "<" => Ok(Relation::Lt),
            "<=" => Ok(Relation::Le),
            ">" => Ok(Relation::Gt),
            ">=" => Ok(Relation::Ge),
            "" | "ANY" => Ok(Relation::Any),
            "NONE" => Ok(Relation::None),
            _ => Err(format!("Invalid relation: {}", s)),
        }
    }
}

/// The ten dependency classes, in store-code order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DepClass {
    Requires,
    Provides,
    Conflicts,
    Obsoletes,
    Prerequires,
    Freshens,
    Recommends,
    Suggests,
    Supplements,
    Enhances,
}

impl DepClass {
    pub const ALL: [DepClass; 10] = [
        DepClass::Requires,
        DepClass::Provides,
        DepClass::Conflicts,
        DepClass::Obsoletes,
        DepClass::Prerequires,
        DepClass::Freshens,
        DepClass::Recommends,
        DepClass::Suggests,
        DepClass::Supplements,
        DepClass::Enhances,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            DepClass::Requires => "requires",
            DepClass::Provides => "provides",
            DepClass::Conflicts => "conflicts",
            DepClass::Obsoletes => "obsoletes",
            DepClass::Prerequires => "prerequires",
            DepClass::Freshens => "freshens",
            DepClass::Recommends => "recommends",
            DepClass::Suggests => "suggests",
            DepClass::Supplements => "supplements",
            DepClass::Enhances => "enhances",
        }
    }

    pub fn code(&self) -> i32 {
        Self::ALL.iter().position(|c| c == self).map_or(0, |p| p as i32)
    }

    pub fn from_code(code: i64) -> Option<DepClass> {
        usize::try_from(code).ok().and_then(|i| Self::ALL.get(i).copied())
    }
}

impl FromStr for DepClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("Invalid dependency class: {}", s))
    }
}

/// A named relation+edition constraint on some target kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Capability {
    pub kind: Kind,
    pub name: String,
    pub relation: Relation,
    pub edition: Option<Edition>,
}

impl Capability {
    /// Build a capability, folding ANY/NONE or a missing edition into the
    /// unconstrained form
    pub fn new(kind: Kind, name: impl Into<String>, relation: Relation, edition: Option<Edition>) -> Self {
        let (relation, edition) = match edition {
            Some(ed) if relation.is_constrained() => (relation, Some(ed)),
            _ => (Relation::Any, None),
        };
        Self {
            kind,
            name: name.into(),
            relation,
            edition,
        }
    }

    pub fn unconstrained(kind: Kind, name: impl Into<String>) -> Self {
        Self::new(kind, name, Relation::Any, None)
    }

    pub fn is_unconstrained(&self) -> bool {
        self.edition.is_none()
    }

    /// Parse `[kind:]name [op edition]`
    ///
    /// `default_kind` applies when the expression carries no kind prefix.
    pub fn parse(default_kind: Kind, expr: &str) -> Result<Self> {
        let fail = |reason: &str| Error::CapabilityParse {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        let tokens: Vec<&str> = expr.split_whitespace().collect();
        let (head, relation, edition) = match tokens.as_slice() {
            [name] => (*name, Relation::Any, None),
            [name, op, ed] => {
                let relation = op.parse::<Relation>().map_err(|e| fail(&e))?;
                let edition = ed.parse::<Edition>().map_err(|e| fail(&e.to_string()))?;
                (*name, relation, Some(edition))
            }
            [] => return Err(fail("empty expression")),
            _ => return Err(fail("expected 'name [op edition]'")),
        };

        let (kind, name) = split_kind_prefix(head).unwrap_or((default_kind, head));
        if name.is_empty() {
            return Err(fail("empty name"));
        }

        Ok(Capability::new(kind, name, relation, edition))
    }

    /// Whether a provided capability satisfies this one
    ///
    /// Names and target kinds must be equal and the edition ranges must
    /// overlap. An unconstrained side overlaps everything.
    pub fn matches(&self, provided: &Capability) -> bool {
        if self.kind != provided.kind || self.name != provided.name {
            return false;
        }

        let (Some(want), Some(have)) = (&self.edition, &provided.edition) else {
            return true;
        };

        let lhs = self.relation.bits();
        let rhs = provided.relation.bits();
        match want.compare(have) {
            Ordering::Less => lhs & REL_GT != 0 || rhs & REL_LT != 0,
            Ordering::Greater => lhs & REL_LT != 0 || rhs & REL_GT != 0,
            Ordering::Equal => {
                (lhs & REL_EQ != 0 && rhs & REL_EQ != 0)
                    || (lhs & REL_LT != 0 && rhs & REL_LT != 0)
                    || (lhs & REL_GT != 0 && rhs & REL_GT != 0)
            }
        }
    }
}

fn split_kind_prefix(head: &str) -> Option<(Kind, &str)> {
    let (prefix, rest) = head.split_once(':')?;
    let kind = prefix.parse::<Kind>().ok()?;
    Some((kind, rest))
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind != Kind::Package {
            write!(f, "{}:", self.kind)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(ed) = &self.edition {
            write!(f, " {} {}", self.relation.as_str(), ed)?;
        }
        Ok(())
    }
}

/// Capability sets of one resolvable, keyed by dependency class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    classes: BTreeMap<DepClass, BTreeSet<Capability>>,
}

impl Dependencies {
    pub fn insert(&mut self, class: DepClass, cap: Capability) -> bool {
        self.classes.entry(class).or_default().insert(cap)
    }

    /// Capabilities of one class (empty if the class has none)
    pub fn get(&self, class: DepClass) -> impl Iterator<Item = &Capability> {
        self.classes.get(&class).into_iter().flatten()
    }

    /// All `(class, capability)` pairs in class order
    pub fn iter(&self) -> impl Iterator<Item = (DepClass, &Capability)> {
        self.classes
            .iter()
            .flat_map(|(class, caps)| caps.iter().map(move |cap| (*class, cap)))
    }

    pub fn len(&self) -> usize {
        self.classes.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(name: &str, rel: Relation, ed: &str) -> Capability {
        Capability::new(Kind::Package, name, rel, Some(ed.parse().unwrap()))
    }

    #[test]
    fn test_parse_expressions() {
        let c = Capability::parse(Kind::Package, "foo >= 1.2-3").unwrap();
        assert_eq!(c.name, "foo");
        assert_eq!(c.relation, Relation::Ge);
        assert_eq!(c.edition, Some(Edition::new("1.2", "3", 0)));

        let bare = Capability::parse(Kind::Package, "  bar ").unwrap();
        assert!(bare.is_unconstrained());
        assert_eq!(bare.relation, Relation::Any);

        let pat = Capability::parse(Kind::Package, "pattern:base").unwrap();
        assert_eq!(pat.kind, Kind::Pattern);
        assert_eq!(pat.name, "base");

        let perl = Capability::parse(Kind::Package, "perl(Foo::Bar)").unwrap();
        assert_eq!(perl.kind, Kind::Package);
        assert_eq!(perl.name, "perl(Foo::Bar)");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Capability::parse(Kind::Package, ""),
            Err(Error::CapabilityParse { .. })
        ));
        assert!(Capability::parse(Kind::Package, "foo >=").is_err());
        assert!(Capability::parse(Kind::Package, "foo ~> 1.0").is_err());
        assert!(Capability::parse(Kind::Package, "foo = 1.0 extra").is_err());
    }

    #[test]
    fn test_none_relation_canonicalizes() {
        let c = Capability::parse(Kind::Package, "foo NONE 1.0").unwrap();
        assert!(c.is_unconstrained());
        assert_eq!(c, Capability::unconstrained(Kind::Package, "foo"));
    }

    #[test]
    fn test_matches_ranges() {
        let provide = cap("foo", Relation::Eq, "2.0-1");

        assert!(cap("foo", Relation::Ge, "1.0").matches(&provide));
        assert!(cap("foo", Relation::Eq, "2.0").matches(&provide));
        assert!(cap("foo", Relation::Le, "2.0-1").matches(&provide));
        assert!(!cap("foo", Relation::Gt, "2.0").matches(&provide));
        assert!(!cap("foo", Relation::Lt, "2.0-1").matches(&provide));
        assert!(!cap("foo", Relation::Ne, "2.0-1").matches(&provide));
        assert!(cap("foo", Relation::Ne, "1.0").matches(&provide));
        assert!(!cap("bar", Relation::Ge, "1.0").matches(&provide));

        let unversioned = Capability::unconstrained(Kind::Package, "foo");
        assert!(unversioned.matches(&provide));
        assert!(cap("foo", Relation::Gt, "9").matches(&unversioned));

        let other_kind = Capability::unconstrained(Kind::Pattern, "foo");
        assert!(!other_kind.matches(&provide));
    }

    #[test]
    fn test_dependencies_set_semantics() {
        let mut deps = Dependencies::default();
        assert!(deps.insert(DepClass::Requires, cap("a", Relation::Ge, "1")));
        assert!(!deps.insert(DepClass::Requires, cap("a", Relation::Ge, "1")));
        assert!(deps.insert(DepClass::Provides, Capability::unconstrained(Kind::Package, "b")));

        assert_eq!(deps.len(), 2);
        assert_eq!(deps.get(DepClass::Requires).count(), 1);
        assert_eq!(deps.get(DepClass::Enhances).count(), 0);
    }

    #[test]
    fn test_dep_class_codes() {
        assert_eq!(DepClass::Requires.code(), 0);
        assert_eq!(DepClass::Enhances.code(), 9);
        assert_eq!(DepClass::from_code(1), Some(DepClass::Provides));
        assert_eq!(DepClass::from_code(10), None);
        assert_eq!(DepClass::from_code(-1), None);
    }
}
