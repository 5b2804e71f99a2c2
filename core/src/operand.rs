//! Operand model.
//!
//! An [`Operand`] is the high-level argument of an instruction. The numeric
//! encoding only exists once the assembler has laid out the code and assigned
//! table indices; until then operands refer to labels, literal values and
//! variable names directly.

use core::fmt;
use core::hash::{Hash, Hasher};

use ecow::EcoString;
use serde::Serialize;

use crate::errors::{Error, Result};
use crate::graph::Label;
use crate::isa::{OpcodeDescriptor, OperandCategory};
use crate::{String, Vec, format};

/// Largest integer operand accepted by any opcode.
pub const MAX_INT_OPERAND: u32 = 2_147_483_647;

/// Constant value referenced through the literal pool.
///
/// Equality and hashing use the literal's content key, so values that a host
/// language might consider equal but encode differently stay distinct:
/// `1`, `1.0` and `true` are three different literals, and so are `0.0` and
/// `-0.0`. A NaN equals itself when the bits match.
#[derive(Debug, Clone, Serialize)]
pub enum Literal {
    None,
    Ellipsis,
    Bool(bool),
    Int(i64),
    Float(f64),
    Complex(f64, f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Literal>),
    List(Vec<Literal>),
    FrozenSet(Vec<Literal>),
    Map(Vec<(Literal, Literal)>),
}

impl Literal {
    /// Serialized canonical form of the value.
    ///
    /// Set elements and map entries are ordered by their own keys first, so
    /// insertion order does not matter.
    pub fn content_key(&self) -> Vec<u8> {
        // Serializing into a growable buffer cannot fail.
        postcard::to_allocvec(&self.canonical()).unwrap_or_default()
    }

    fn canonical(&self) -> Literal {
        match self {
            Literal::Tuple(items) => Literal::Tuple(items.iter().map(Literal::canonical).collect()),
            Literal::List(items) => Literal::List(items.iter().map(Literal::canonical).collect()),
            Literal::FrozenSet(items) => {
                let mut keyed: Vec<(Vec<u8>, Literal)> = items
                    .iter()
                    .map(|item| (item.content_key(), item.canonical()))
                    .collect();
                keyed.sort_by(|a, b| a.0.cmp(&b.0));
                keyed.dedup_by(|a, b| a.0 == b.0);
                Literal::FrozenSet(keyed.into_iter().map(|(_, item)| item).collect())
            }
            Literal::Map(entries) => {
                let mut keyed: Vec<(Vec<u8>, (Literal, Literal))> = entries
                    .iter()
                    .map(|(k, v)| (k.content_key(), (k.canonical(), v.canonical())))
                    .collect();
                keyed.sort_by(|a, b| a.0.cmp(&b.0));
                Literal::Map(keyed.into_iter().map(|(_, entry)| entry).collect())
            }
            other => other.clone(),
        }
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        self.content_key() == other.content_key()
    }
}

impl Eq for Literal {}

impl Hash for Literal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.content_key().hash(state);
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn seq(f: &mut fmt::Formatter<'_>, items: &[Literal]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }

        match self {
            Literal::None => write!(f, "None"),
            Literal::Ellipsis => write!(f, "Ellipsis"),
            Literal::Bool(true) => write!(f, "True"),
            Literal::Bool(false) => write!(f, "False"),
            Literal::Int(v) => write!(f, "{v}"),
            Literal::Float(v) => write!(f, "{v:?}"),
            Literal::Complex(re, im) => write!(f, "({re:?}{im:+?}j)"),
            Literal::Str(s) => write!(f, "{s:?}"),
            Literal::Bytes(bytes) => {
                write!(f, "b\"")?;
                for b in bytes {
                    write!(f, "{}", core::ascii::escape_default(*b))?;
                }
                write!(f, "\"")
            }
            Literal::Tuple(items) => {
                write!(f, "(")?;
                seq(f, items)?;
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Literal::List(items) => {
                write!(f, "[")?;
                seq(f, items)?;
                write!(f, "]")
            }
            Literal::FrozenSet(items) => {
                write!(f, "frozenset({{")?;
                seq(f, items)?;
                write!(f, "}})")
            }
            Literal::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Which variable table a [`VariableRef`] indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKind {
    /// Local variable (`varnames`).
    Local,
    /// Global or attribute name (`names`).
    Name,
    /// Cell variable owned by this code unit (`cellvars`).
    Cell,
    /// Free variable captured from an enclosing scope (`freevars`).
    Free,
}

/// A named reference into one of the code unit's variable tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableRef {
    pub kind: VarKind,
    pub name: EcoString,
}

impl VariableRef {
    pub fn new(kind: VarKind, name: impl Into<EcoString>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn local(name: impl Into<EcoString>) -> Self {
        Self::new(VarKind::Local, name)
    }

    pub fn name(name: impl Into<EcoString>) -> Self {
        Self::new(VarKind::Name, name)
    }

    pub fn cell(name: impl Into<EcoString>) -> Self {
        Self::new(VarKind::Cell, name)
    }

    pub fn free(name: impl Into<EcoString>) -> Self {
        Self::new(VarKind::Free, name)
    }
}

impl fmt::Display for VariableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            VarKind::Local | VarKind::Name => write!(f, "{}", self.name),
            VarKind::Cell => write!(f, "<cell {}>", self.name),
            VarKind::Free => write!(f, "<free {}>", self.name),
        }
    }
}

/// Comparison kind of a `COMPARE_OP`-style instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Compare {
    Lt = 0,
    Le = 1,
    Eq = 2,
    Ne = 3,
    Gt = 4,
    Ge = 5,
    In = 6,
    NotIn = 7,
    Is = 8,
    IsNot = 9,
    ExcMatch = 10,
}

impl Compare {
    pub const ALL: [Compare; 11] = [
        Compare::Lt,
        Compare::Le,
        Compare::Eq,
        Compare::Ne,
        Compare::Gt,
        Compare::Ge,
        Compare::In,
        Compare::NotIn,
        Compare::Is,
        Compare::IsNot,
        Compare::ExcMatch,
    ];

    pub fn from_arg(arg: u32) -> Option<Compare> {
        Self::ALL.get(arg as usize).copied()
    }

    pub fn arg(self) -> u32 {
        self as u32
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Compare::Lt => "<",
            Compare::Le => "<=",
            Compare::Eq => "==",
            Compare::Ne => "!=",
            Compare::Gt => ">",
            Compare::Ge => ">=",
            Compare::In => "in",
            Compare::NotIn => "not in",
            Compare::Is => "is",
            Compare::IsNot => "is not",
            Compare::ExcMatch => "exception match",
        }
    }
}

/// High-level instruction argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Operand {
    #[default]
    None,
    Int(u32),
    Label(Label),
    Literal(Literal),
    Var(VariableRef),
    Compare(Compare),
    /// Name paired with a low flag bit, e.g. `LOAD_GLOBAL (push_null, name)`.
    Flagged(bool, EcoString),
}

impl Operand {
    pub fn is_none(&self) -> bool {
        matches!(self, Operand::None)
    }

    pub fn label(&self) -> Option<Label> {
        match self {
            Operand::Label(label) => Some(*label),
            _ => None,
        }
    }

    /// Integer fed to stack-effect formulas.
    pub fn effect_arg(&self) -> u32 {
        match self {
            Operand::Int(v) => *v,
            Operand::Flagged(flag, _) => *flag as u32,
            Operand::Compare(cmp) => cmp.arg(),
            _ => 0,
        }
    }

    /// Checks that this operand is acceptable for `op`.
    pub fn check(&self, op: &OpcodeDescriptor) -> Result<()> {
        if op.is_extended_arg() {
            return Err(Error::invalid_operand(
                op.name(),
                "the extended-operand prefix is produced by the assembler only",
            ));
        }

        let category = op.category();
        let matches = match (category, self) {
            (OperandCategory::None, Operand::None) => return Ok(()),
            (OperandCategory::None, _) => {
                return Err(Error::OperandArity {
                    name: op.name().clone(),
                    requires: false,
                });
            }
            (_, Operand::None) => {
                return Err(Error::OperandArity {
                    name: op.name().clone(),
                    requires: true,
                });
            }
            (OperandCategory::Int, Operand::Int(v)) => {
                if *v > MAX_INT_OPERAND {
                    return Err(Error::invalid_operand(
                        op.name(),
                        format!("argument {v} is outside 0..=2147483647"),
                    ));
                }
                true
            }
            (OperandCategory::JumpRelative | OperandCategory::JumpAbsolute, Operand::Label(_)) => {
                true
            }
            (OperandCategory::Literal, Operand::Literal(_)) => true,
            (OperandCategory::Name, Operand::Var(var)) => var.kind == VarKind::Name,
            (OperandCategory::Local, Operand::Var(var)) => var.kind == VarKind::Local,
            (OperandCategory::Free, Operand::Var(var)) => {
                matches!(var.kind, VarKind::Cell | VarKind::Free)
            }
            (OperandCategory::FlaggedName, Operand::Flagged(..)) => true,
            (OperandCategory::Compare, Operand::Compare(_)) => true,
            _ => false,
        };

        if matches {
            Ok(())
        } else {
            Err(Error::invalid_operand(
                op.name(),
                format!("expected {}, got {}", category_name(category), self.kind_name()),
            ))
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Operand::None => "no operand",
            Operand::Int(_) => "an integer",
            Operand::Label(_) => "a label",
            Operand::Literal(_) => "a literal",
            Operand::Var(var) => match var.kind {
                VarKind::Local => "a local variable",
                VarKind::Name => "a name",
                VarKind::Cell => "a cell variable",
                VarKind::Free => "a free variable",
            },
            Operand::Compare(_) => "a comparison",
            Operand::Flagged(..) => "a flagged name",
        }
    }
}

fn category_name(category: OperandCategory) -> &'static str {
    match category {
        OperandCategory::None => "no operand",
        OperandCategory::Int => "an integer",
        OperandCategory::JumpRelative | OperandCategory::JumpAbsolute => "a label",
        OperandCategory::Literal => "a literal",
        OperandCategory::Name => "a name",
        OperandCategory::FlaggedName => "a flagged name",
        OperandCategory::Local => "a local variable",
        OperandCategory::Free => "a cell or free variable",
        OperandCategory::Compare => "a comparison",
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Int(v) => write!(f, "{v}"),
            Operand::Label(label) => write!(f, "{label}"),
            Operand::Literal(lit) => write!(f, "{lit}"),
            Operand::Var(var) => write!(f, "{var}"),
            Operand::Compare(cmp) => write!(f, "{}", cmp.symbol()),
            Operand::Flagged(flag, name) => write!(f, "({flag}, {name})"),
        }
    }
}

impl From<Literal> for Operand {
    fn from(lit: Literal) -> Self {
        Operand::Literal(lit)
    }
}

impl From<Label> for Operand {
    fn from(label: Label) -> Self {
        Operand::Label(label)
    }
}

impl From<VariableRef> for Operand {
    fn from(var: VariableRef) -> Self {
        Operand::Var(var)
    }
}

impl From<Compare> for Operand {
    fn from(cmp: Compare) -> Self {
        Operand::Compare(cmp)
    }
}

impl From<u32> for Operand {
    fn from(v: u32) -> Self {
        Operand::Int(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::InstructionSet;
    use crate::vec;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_literal_equality_is_by_content() {
        assert_ne!(Literal::Int(1), Literal::Float(1.0));
        assert_ne!(Literal::Int(1), Literal::Bool(true));
        assert_ne!(Literal::Float(0.0), Literal::Float(-0.0));
        assert_eq!(Literal::Float(f64::NAN), Literal::Float(f64::NAN));
        assert_eq!(
            Literal::Str("abc".into()),
            Literal::Str(String::from("abc"))
        );
    }

    #[test]
    fn test_distinct_maps_with_same_pairs_are_equal() {
        let a = Literal::Map(vec![
            (Literal::Str("x".into()), Literal::Int(1)),
            (Literal::Str("y".into()), Literal::Int(2)),
        ]);
        let b = Literal::Map(vec![
            (Literal::Str("y".into()), Literal::Int(2)),
            (Literal::Str("x".into()), Literal::Int(1)),
        ]);
        assert_eq!(a, b);
        assert_eq!(a.content_key(), b.content_key());

        let c = Literal::Map(vec![(Literal::Str("x".into()), Literal::Int(3))]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_tuple_order_matters_but_set_order_does_not() {
        let t1 = Literal::Tuple(vec![Literal::Int(1), Literal::Int(2)]);
        let t2 = Literal::Tuple(vec![Literal::Int(2), Literal::Int(1)]);
        assert_ne!(t1, t2);

        let s1 = Literal::FrozenSet(vec![Literal::Int(1), Literal::Int(2)]);
        let s2 = Literal::FrozenSet(vec![Literal::Int(2), Literal::Int(1)]);
        assert_eq!(s1, s2);
    }

    #[test]
    fn test_compare_codes_round_trip() {
        for cmp in Compare::ALL {
            assert_eq!(Compare::from_arg(cmp.arg()), Some(cmp));
        }
        assert_eq!(Compare::from_arg(11), None);
        assert_eq!(Compare::Is.arg(), 8);
    }

    #[test]
    fn test_check_operand_categories() {
        let isa = InstructionSet::cpython35();
        let op = |name: &str| isa.get(name).unwrap();

        assert!(Operand::None.check(op("NOP")).is_ok());
        assert!(matches!(
            Operand::Int(1).check(op("NOP")),
            Err(Error::OperandArity {
                requires: false,
                ..
            })
        ));
        assert!(matches!(
            Operand::None.check(op("LOAD_CONST")),
            Err(Error::OperandArity { requires: true, .. })
        ));
        assert!(matches!(
            Operand::Int(1).check(op("LOAD_CONST")),
            Err(Error::InvalidOperand { .. })
        ));
        assert!(Operand::Var(VariableRef::local("x")).check(op("LOAD_FAST")).is_ok());
        assert!(Operand::Var(VariableRef::name("x")).check(op("LOAD_FAST")).is_err());
        assert!(Operand::Var(VariableRef::cell("x")).check(op("LOAD_DEREF")).is_ok());
        assert!(Operand::Var(VariableRef::free("x")).check(op("LOAD_DEREF")).is_ok());
        assert!(Operand::Compare(Compare::Lt).check(op("COMPARE_OP")).is_ok());
    }

    #[test]
    fn test_int_range_is_enforced() {
        let isa = InstructionSet::cpython35();
        let build_tuple = isa.get("BUILD_TUPLE").unwrap();
        assert!(Operand::Int(MAX_INT_OPERAND).check(build_tuple).is_ok());
        assert!(matches!(
            Operand::Int(MAX_INT_OPERAND + 1).check(build_tuple),
            Err(Error::InvalidOperand { .. })
        ));
    }

    #[test]
    fn test_extended_arg_is_rejected() {
        let isa = InstructionSet::cpython35();
        let ext = isa.extended_arg().unwrap();
        assert!(matches!(
            Operand::Int(1).check(ext),
            Err(Error::InvalidOperand { .. })
        ));
    }

    #[test]
    fn test_literal_display() {
        let lit = Literal::Tuple(vec![Literal::Int(1)]);
        assert_eq!(format!("{lit}"), "(1,)");
        assert_eq!(format!("{}", Literal::Float(1.0)), "1.0");
        assert_eq!(format!("{}", Literal::Str("a".into())), "\"a\"");
    }
}
