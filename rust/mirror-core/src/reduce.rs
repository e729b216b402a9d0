// rust/mirror-core/src/reduce.rs

//! Cross-replica reductions on the host.

use std::fmt;
use std::str::FromStr;

use ndarray::ArrayD;

use crate::error::{Result, StrategyError};
use crate::tensor::{DType, Tensor};

/// How per-replica values are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Mean,
}

impl ReduceOp {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Mean => "mean",
        }
    }
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReduceOp {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(ReduceOp::Sum),
            "mean" => Ok(ReduceOp::Mean),
            other => Err(StrategyError::tensor(format!("unknown reduce op '{}'", other))),
        }
    }
}

/// Combines same-shaped per-replica values elementwise.
///
/// `Mean` on integer tensors truncates toward zero.
pub(crate) fn reduce_values(op: ReduceOp, values: &[Tensor]) -> Result<Tensor> {
    let first = values
        .first()
        .ok_or_else(|| StrategyError::tensor("cannot reduce zero values"))?;
    if let Some(other) = values
        .iter()
        .find(|v| v.shape() != first.shape() || v.dtype() != first.dtype())
    {
        return Err(StrategyError::tensor(format!(
            "cannot reduce {} {:?} with {} {:?}",
            first.dtype(),
            first.shape(),
            other.dtype(),
            other.shape()
        )));
    }

    let count = values.len();
    Ok(match first.dtype() {
        DType::Float32 => {
            let arrays: Vec<&ArrayD<f32>> = values.iter().filter_map(Tensor::as_f32).collect();
            let sum = sum_arrays(&arrays)?;
            match op {
                ReduceOp::Sum => Tensor::Float32(sum),
                ReduceOp::Mean => Tensor::Float32(sum / count as f32),
            }
        }
        DType::Int64 => {
            let arrays: Vec<&ArrayD<i64>> = values.iter().filter_map(Tensor::as_i64).collect();
            let sum = sum_arrays(&arrays)?;
            match op {
                ReduceOp::Sum => Tensor::Int64(sum),
                ReduceOp::Mean => Tensor::Int64(sum / count as i64),
            }
        }
    })
}

fn sum_arrays<T>(arrays: &[&ArrayD<T>]) -> Result<ArrayD<T>>
where
    T: Clone + std::ops::AddAssign,
{
    let (first, rest) = arrays
        .split_first()
        .ok_or_else(|| StrategyError::tensor("cannot reduce zero values"))?;
    let mut total = (*first).clone();
    for array in rest {
        total += *array;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_and_mean() {
        let values = vec![
            Tensor::from(vec![1.0f32, 2.0]),
            Tensor::from(vec![3.0f32, 6.0]),
        ];
        assert_eq!(
            reduce_values(ReduceOp::Sum, &values).unwrap(),
            Tensor::from(vec![4.0f32, 8.0])
        );
        assert_eq!(
            reduce_values(ReduceOp::Mean, &values).unwrap(),
            Tensor::from(vec![2.0f32, 4.0])
        );
    }

    #[test]
    fn test_integer_mean_truncates() {
        let values = vec![Tensor::from(vec![1i64]), Tensor::from(vec![2i64])];
        assert_eq!(
            reduce_values(ReduceOp::Mean, &values).unwrap(),
            Tensor::from(vec![1i64])
        );
    }

    #[test]
    fn test_reduce_rejects_mismatch() {
        let values = vec![Tensor::from(vec![1.0f32]), Tensor::from(vec![1.0f32, 2.0])];
        assert!(reduce_values(ReduceOp::Sum, &values).is_err());
        assert!(reduce_values(ReduceOp::Sum, &[]).is_err());
    }

    #[test]
    fn test_parse_reduce_op() {
        assert_eq!("SUM".parse::<ReduceOp>().unwrap(), ReduceOp::Sum);
        assert_eq!(ReduceOp::Mean.to_string(), "mean");
        assert!("max".parse::<ReduceOp>().is_err());
    }
}
