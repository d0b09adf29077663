//! Expressions evaluated by the storage layer.
//!
//! The binder hands the table default values and cast expressions as opaque
//! callables over columnar input. The table only needs to evaluate them.

use std::fmt;
use std::sync::Arc;

use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{DataChunk, LogicalType, Value, Vector};

/// An expression producing one output value per input row.
pub trait Expression: Send + Sync + fmt::Debug {
    /// Type of the produced vector.
    fn return_type(&self) -> &LogicalType;

    /// Evaluates the expression over `input`.
    fn evaluate(&self, input: &DataChunk) -> QuarryResult<Vector>;
}

/// Evaluates `expression` and checks the result's shape.
pub fn evaluate_checked(expression: &dyn Expression, input: &DataChunk) -> QuarryResult<Vector> {
    let result = expression.evaluate(input)?;
    if result.len() != input.size() {
        return Err(QuarryError::internal(format!(
            "expression produced {} values for {} rows",
            result.len(),
            input.size()
        )));
    }
    if result.logical_type() != expression.return_type() {
        return Err(QuarryError::type_mismatch(
            expression.return_type(),
            result.logical_type(),
        ));
    }
    result.verify()?;
    Ok(result)
}

type ChunkFn = dyn Fn(&DataChunk) -> QuarryResult<Vector> + Send + Sync;

/// An expression backed by a closure.
#[derive(Clone)]
pub struct FnExpression {
    return_type: LogicalType,
    func: Arc<ChunkFn>,
}

impl FnExpression {
    /// Wraps a closure over whole chunks.
    pub fn new(
        return_type: LogicalType,
        func: impl Fn(&DataChunk) -> QuarryResult<Vector> + Send + Sync + 'static,
    ) -> Self {
        Self {
            return_type,
            func: Arc::new(func),
        }
    }

    /// Wraps a closure evaluated once per row.
    pub fn per_row(
        return_type: LogicalType,
        func: impl Fn(&[Value]) -> QuarryResult<Value> + Send + Sync + 'static,
    ) -> Self {
        let ty = return_type.clone();
        Self::new(return_type, move |input| {
            let values = input
                .rows()
                .map(|row| func(&row))
                .collect::<QuarryResult<Vec<_>>>()?;
            Ok(Vector::from_values(ty.clone(), values))
        })
    }
}

impl fmt::Debug for FnExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnExpression")
            .field("return_type", &self.return_type)
            .finish_non_exhaustive()
    }
}

impl Expression for FnExpression {
    fn return_type(&self) -> &LogicalType {
        &self.return_type
    }

    fn evaluate(&self, input: &DataChunk) -> QuarryResult<Vector> {
        (self.func)(input)
    }
}

/// A constant, used for column defaults.
#[derive(Debug, Clone)]
pub struct ConstantExpression {
    return_type: LogicalType,
    value: Value,
}

impl ConstantExpression {
    /// Creates a constant of `return_type`.
    pub fn new(return_type: LogicalType, value: Value) -> QuarryResult<Self> {
        if !value.conforms_to(&return_type) {
            return Err(QuarryError::type_mismatch(&return_type, value.type_name()));
        }
        Ok(Self { return_type, value })
    }

    /// Creates a NULL constant of `return_type`.
    pub fn null(return_type: LogicalType) -> Self {
        Self {
            return_type,
            value: Value::Null,
        }
    }
}

impl Expression for ConstantExpression {
    fn return_type(&self) -> &LogicalType {
        &self.return_type
    }

    fn evaluate(&self, input: &DataChunk) -> QuarryResult<Vector> {
        Ok(Vector::constant(
            self.return_type.clone(),
            self.value.clone(),
            input.size(),
        ))
    }
}

/// Casts the first input column to a target type.
#[derive(Debug, Clone)]
pub struct CastExpression {
    target: LogicalType,
}

impl CastExpression {
    /// Creates a cast to `target`.
    pub fn new(target: LogicalType) -> Self {
        Self { target }
    }
}

impl Expression for CastExpression {
    fn return_type(&self) -> &LogicalType {
        &self.target
    }

    fn evaluate(&self, input: &DataChunk) -> QuarryResult<Vector> {
        let source = input.columns().first().ok_or_else(|| {
            QuarryError::invalid_argument("cast expression needs one input column")
        })?;
        let values = source
            .iter()
            .map(|value| value.cast(&self.target))
            .collect::<QuarryResult<Vec<_>>>()?;
        Ok(Vector::from_values(self.target.clone(), values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_on_columnless_chunk() {
        let input = DataChunk::with_size(Vec::new(), 3).unwrap();
        let expr = ConstantExpression::new(LogicalType::Integer, Value::Integer(7)).unwrap();
        let out = evaluate_checked(&expr, &input).unwrap();
        assert_eq!(out.values(), &[Value::Integer(7), Value::Integer(7), Value::Integer(7)]);
        assert!(ConstantExpression::new(LogicalType::Integer, Value::from("x")).is_err());
    }

    #[test]
    fn test_cast_expression() {
        let input = DataChunk::from_rows(
            &[LogicalType::Integer],
            &[vec![Value::Integer(4)], vec![Value::Null]],
        )
        .unwrap();
        let out = evaluate_checked(&CastExpression::new(LogicalType::Varchar), &input).unwrap();
        assert_eq!(out.values(), &[Value::from("4"), Value::Null]);
    }

    #[test]
    fn test_shape_is_checked() {
        let input = DataChunk::with_size(Vec::new(), 2).unwrap();
        let wrong_len = FnExpression::new(LogicalType::Integer, |_| {
            Ok(Vector::new(LogicalType::Integer))
        });
        assert!(evaluate_checked(&wrong_len, &input).is_err());

        let wrong_type = FnExpression::per_row(LogicalType::Integer, |_| Ok(Value::from("a")));
        assert!(evaluate_checked(&wrong_type, &input).is_err());
    }
}
