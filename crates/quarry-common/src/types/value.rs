//! Logical types and runtime values.
//!
//! Values carry a total order within each type, which indexes and zone maps
//! rely on. Comparisons across unrelated types are answered by
//! [`Value::try_compare`] with `None`.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{QuarryError, QuarryResult};

/// The logical type of a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogicalType {
    /// Boolean.
    Boolean,
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    BigInt,
    /// 64-bit floating point.
    Double,
    /// Variable-length UTF-8 string.
    Varchar,
    /// Struct with named child fields.
    Struct(Vec<(String, LogicalType)>),
}

impl LogicalType {
    /// Returns true if this is a struct type.
    #[must_use]
    pub fn is_struct(&self) -> bool {
        matches!(self, Self::Struct(_))
    }

    /// Returns true if this is a numeric type.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::BigInt | Self::Double)
    }

    /// Returns the type of child `index` of a struct type.
    #[must_use]
    pub fn child_type(&self, index: usize) -> Option<&LogicalType> {
        match self {
            Self::Struct(fields) => fields.get(index).map(|(_, ty)| ty),
            _ => None,
        }
    }

    /// Resolves a sub-column path (`[]` is the column itself).
    pub fn resolve_path(&self, path: &[usize]) -> QuarryResult<&LogicalType> {
        let mut current = self;
        for &child in path {
            current = current.child_type(child).ok_or_else(|| {
                QuarryError::invalid_argument(format!(
                    "column path {:?} does not exist in type {}",
                    path, self
                ))
            })?;
        }
        Ok(current)
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Integer => write!(f, "INTEGER"),
            Self::BigInt => write!(f, "BIGINT"),
            Self::Double => write!(f, "DOUBLE"),
            Self::Varchar => write!(f, "VARCHAR"),
            Self::Struct(fields) => {
                write!(f, "STRUCT(")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", name, ty)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A single value of some logical type.
#[derive(Debug, Clone)]
pub enum Value {
    /// NULL value of any type.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// 32-bit signed integer.
    Integer(i32),
    /// 64-bit signed integer.
    BigInt(i64),
    /// 64-bit floating point.
    Double(f64),
    /// String value.
    Varchar(String),
    /// Struct value, one entry per child field.
    Struct(Vec<Value>),
}

impl Value {
    /// Returns true if this value is NULL.
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true if the value can be stored in a column of `ty`.
    #[must_use]
    pub fn conforms_to(&self, ty: &LogicalType) -> bool {
        match (self, ty) {
            (Self::Null, _) => true,
            (Self::Boolean(_), LogicalType::Boolean)
            | (Self::Integer(_), LogicalType::Integer)
            | (Self::BigInt(_), LogicalType::BigInt)
            | (Self::Double(_), LogicalType::Double)
            | (Self::Varchar(_), LogicalType::Varchar) => true,
            (Self::Struct(children), LogicalType::Struct(fields)) => {
                children.len() == fields.len()
                    && children
                        .iter()
                        .zip(fields)
                        .all(|(value, (_, child))| value.conforms_to(child))
            }
            _ => false,
        }
    }

    /// Returns a short name of the value's type, for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Boolean(_) => "BOOLEAN",
            Self::Integer(_) => "INTEGER",
            Self::BigInt(_) => "BIGINT",
            Self::Double(_) => "DOUBLE",
            Self::Varchar(_) => "VARCHAR",
            Self::Struct(_) => "STRUCT",
        }
    }

    /// Converts to i64 for integral values.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(i64::from(*v)),
            Self::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Converts to f64 for numeric values.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(f64::from(*v)),
            Self::BigInt(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the boolean payload, if any.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the child value at `path` inside nested structs.
    #[must_use]
    pub fn get_path(&self, path: &[usize]) -> Option<&Value> {
        let mut current = self;
        for &child in path {
            match current {
                Self::Struct(children) => current = children.get(child)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Replaces the child value at `path` inside nested structs.
    ///
    /// A NULL struct along the path is expanded into a struct of NULLs
    /// shaped like `ty`.
    pub fn set_path(&mut self, ty: &LogicalType, path: &[usize], value: Value) -> QuarryResult<()> {
        let Some((&first, rest)) = path.split_first() else {
            *self = value;
            return Ok(());
        };
        let LogicalType::Struct(fields) = ty else {
            return Err(QuarryError::invalid_argument(format!(
                "cannot descend into non-struct type {}",
                ty
            )));
        };
        if self.is_null() {
            *self = Value::Struct(vec![Value::Null; fields.len()]);
        }
        let child_type = fields
            .get(first)
            .map(|(_, child)| child)
            .ok_or_else(|| QuarryError::invalid_argument(format!("no struct field {}", first)))?;
        match self {
            Self::Struct(children) => match children.get_mut(first) {
                Some(child) => child.set_path(child_type, rest, value),
                None => Err(QuarryError::invalid_argument(format!(
                    "no struct field {}",
                    first
                ))),
            },
            other => Err(QuarryError::type_mismatch(ty, other.type_name())),
        }
    }

    /// Compares two values of compatible types.
    ///
    /// Numeric types compare with each other; other types compare only with
    /// themselves. Returns `None` when either side is NULL or the types are
    /// incomparable.
    #[must_use]
    pub fn try_compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Varchar(a), Self::Varchar(b)) => Some(a.cmp(b)),
            (Self::Struct(_), Self::Struct(_)) => Some(self.cmp(other)),
            (Self::Integer(_) | Self::BigInt(_), Self::Integer(_) | Self::BigInt(_)) => {
                Some(self.as_i64()?.cmp(&other.as_i64()?))
            }
            (a, b) => {
                let (a, b) = (a.as_f64()?, b.as_f64()?);
                Some(a.total_cmp(&b))
            }
        }
    }

    /// Casts the value to the target type.
    pub fn cast(&self, target: &LogicalType) -> QuarryResult<Value> {
        if self.is_null() || self.conforms_to(target) {
            return Ok(self.clone());
        }
        let fail = || QuarryError::type_mismatch(target, self.type_name());
        let cast = match target {
            LogicalType::Boolean => match self {
                Self::Integer(v) => Value::Boolean(*v != 0),
                Self::BigInt(v) => Value::Boolean(*v != 0),
                Self::Varchar(s) => match s.to_ascii_lowercase().as_str() {
                    "true" | "t" | "1" => Value::Boolean(true),
                    "false" | "f" | "0" => Value::Boolean(false),
                    _ => return Err(fail()),
                },
                _ => return Err(fail()),
            },
            LogicalType::Integer => match self {
                Self::Boolean(b) => Value::Integer(i32::from(*b)),
                Self::BigInt(v) => Value::Integer(i32::try_from(*v).map_err(|_| fail())?),
                Self::Double(v) if v.is_finite() => {
                    let rounded = v.round();
                    if rounded < f64::from(i32::MIN) || rounded > f64::from(i32::MAX) {
                        return Err(fail());
                    }
                    Value::Integer(rounded as i32)
                }
                Self::Varchar(s) => Value::Integer(s.trim().parse().map_err(|_| fail())?),
                _ => return Err(fail()),
            },
            LogicalType::BigInt => match self {
                Self::Boolean(b) => Value::BigInt(i64::from(*b)),
                Self::Integer(v) => Value::BigInt(i64::from(*v)),
                Self::Double(v) if v.is_finite() => Value::BigInt(v.round() as i64),
                Self::Varchar(s) => Value::BigInt(s.trim().parse().map_err(|_| fail())?),
                _ => return Err(fail()),
            },
            LogicalType::Double => match self {
                Self::Varchar(s) => Value::Double(s.trim().parse().map_err(|_| fail())?),
                other => Value::Double(other.as_f64().ok_or_else(fail)?),
            },
            LogicalType::Varchar => Value::Varchar(self.to_string()),
            LogicalType::Struct(_) => return Err(fail()),
        };
        Ok(cast)
    }

    fn type_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Integer(_) => 2,
            Self::BigInt(_) => 3,
            Self::Double(_) => 4,
            Self::Varchar(_) => 5,
            Self::Struct(_) => 6,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    /// Total order: NULL first, then by type, then by value.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::BigInt(a), Self::BigInt(b)) => a.cmp(b),
            (Self::Double(a), Self::Double(b)) => a.total_cmp(b),
            (Self::Varchar(a), Self::Varchar(b)) => a.cmp(b),
            (Self::Struct(a), Self::Struct(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(v) => write!(f, "{}", v),
            Self::BigInt(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Varchar(s) => write!(f, "{}", s),
            Self::Struct(children) => {
                write!(f, "{{")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Varchar(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Varchar(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_order() {
        let mut values = vec![
            Value::Integer(3),
            Value::Null,
            Value::Integer(-1),
            Value::Varchar("b".into()),
        ];
        values.sort();
        assert_eq!(values[0], Value::Null);
        assert_eq!(values[1], Value::Integer(-1));
        assert_eq!(values[3], Value::Varchar("b".into()));
    }

    #[test]
    fn test_try_compare() {
        assert_eq!(
            Value::Integer(2).try_compare(&Value::BigInt(3)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Double(2.5).try_compare(&Value::Integer(2)),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Integer(1).try_compare(&Value::from("1")), None);
        assert_eq!(Value::Null.try_compare(&Value::Integer(1)), None);
    }

    #[test]
    fn test_cast() {
        assert_eq!(
            Value::Integer(7).cast(&LogicalType::Varchar).unwrap(),
            Value::from("7")
        );
        assert_eq!(
            Value::from(" 42 ").cast(&LogicalType::BigInt).unwrap(),
            Value::BigInt(42)
        );
        assert!(Value::from("x").cast(&LogicalType::Integer).is_err());
        assert!(Value::BigInt(i64::MAX).cast(&LogicalType::Integer).is_err());
        assert_eq!(Value::Null.cast(&LogicalType::Double).unwrap(), Value::Null);
    }

    #[test]
    fn test_struct_paths() {
        let ty = LogicalType::Struct(vec![
            ("a".into(), LogicalType::Integer),
            (
                "b".into(),
                LogicalType::Struct(vec![("c".into(), LogicalType::Varchar)]),
            ),
        ]);
        assert_eq!(ty.resolve_path(&[1, 0]).unwrap(), &LogicalType::Varchar);
        assert!(ty.resolve_path(&[0, 0]).is_err());

        let mut value = Value::Null;
        value.set_path(&ty, &[1, 0], Value::from("x")).unwrap();
        assert!(value.conforms_to(&ty));
        assert_eq!(value.get_path(&[1, 0]), Some(&Value::from("x")));
        assert_eq!(value.get_path(&[0]), Some(&Value::Null));
    }
}
