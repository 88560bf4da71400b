use std::collections::HashSet;

use super::parser::AggregateFunction;
use crate::data::Value;

/// Running state of one aggregate over a group
pub trait Accumulator: Send {
    fn accumulate(&mut self, value: &Value);

    fn result(&self) -> Value;
}

/// COUNT(*) or COUNT(column)
#[derive(Debug, Clone)]
pub struct CountAccumulator {
    count: i64,
    count_nulls: bool, // COUNT(*) counts nulls, COUNT(col) doesn't
}

impl CountAccumulator {
    pub fn count_all() -> Self {
        Self {
            count: 0,
            count_nulls: true,
        }
    }

    pub fn count_column() -> Self {
        Self {
            count: 0,
            count_nulls: false,
        }
    }
}

impl Accumulator for CountAccumulator {
    fn accumulate(&mut self, value: &Value) {
        if self.count_nulls || !value.is_null() {
            self.count += 1;
        }
    }

    fn result(&self) -> Value {
        Value::Int64(self.count)
    }
}

/// SUM(column); stays integral until a float is seen or the sum overflows
#[derive(Debug, Clone, Default)]
pub struct SumAccumulator {
    int_sum: i64,
    float_sum: f64,
    is_float: bool,
    has_value: bool,
}

impl Accumulator for SumAccumulator {
    fn accumulate(&mut self, value: &Value) {
        match value {
            Value::Int64(i) if !self.is_float => match self.int_sum.checked_add(*i) {
                Some(sum) => self.int_sum = sum,
                None => {
                    self.is_float = true;
                    self.float_sum = self.int_sum as f64 + *i as f64;
                }
            },
            other => {
                let Some(v) = other.as_f64() else {
                    return;
                };
                if !self.is_float {
                    self.is_float = true;
                    self.float_sum = self.int_sum as f64;
                }
                self.float_sum += v;
            }
        }
        self.has_value = true;
    }

    fn result(&self) -> Value {
        match (self.has_value, self.is_float) {
            (false, _) => Value::Null,
            (true, false) => Value::Int64(self.int_sum),
            (true, true) => Value::Float64(self.float_sum),
        }
    }
}

/// AVG(column)
#[derive(Debug, Clone, Default)]
pub struct AvgAccumulator {
    sum: f64,
    count: i64,
}

impl Accumulator for AvgAccumulator {
    fn accumulate(&mut self, value: &Value) {
        if let Some(v) = value.as_f64() {
            self.sum += v;
            self.count += 1;
        }
    }

    fn result(&self) -> Value {
        if self.count > 0 {
            Value::Float64(self.sum / self.count as f64)
        } else {
            Value::Null
        }
    }
}

/// MIN(column) or MAX(column)
#[derive(Debug, Clone)]
pub struct ExtremumAccumulator {
    current: Option<Value>,
    keep_greater: bool,
}

impl ExtremumAccumulator {
    pub fn min() -> Self {
        Self {
            current: None,
            keep_greater: false,
        }
    }

    pub fn max() -> Self {
        Self {
            current: None,
            keep_greater: true,
        }
    }
}

impl Accumulator for ExtremumAccumulator {
    fn accumulate(&mut self, value: &Value) {
        if value.is_null() {
            return;
        }
        let replace = match &self.current {
            None => true,
            Some(current) if self.keep_greater => value > current,
            Some(current) => value < current,
        };
        if replace {
            self.current = Some(value.clone());
        }
    }

    fn result(&self) -> Value {
        self.current.clone().unwrap_or(Value::Null)
    }
}

/// Feeds only the first occurrence of each non-null value to the inner accumulator
pub struct DistinctAccumulator {
    seen: HashSet<Value>,
    inner: Box<dyn Accumulator>,
}

impl Accumulator for DistinctAccumulator {
    fn accumulate(&mut self, value: &Value) {
        if !value.is_null() && self.seen.insert(value.clone()) {
            self.inner.accumulate(value);
        }
    }

    fn result(&self) -> Value {
        self.inner.result()
    }
}

/// `count_all` is true for `COUNT(*)`
pub fn create_accumulator(function: AggregateFunction, count_all: bool, distinct: bool) -> Box<dyn Accumulator> {
    let inner: Box<dyn Accumulator> = match function {
        AggregateFunction::Count if count_all => Box::new(CountAccumulator::count_all()),
        AggregateFunction::Count => Box::new(CountAccumulator::count_column()),
        AggregateFunction::Sum => Box::<SumAccumulator>::default(),
        AggregateFunction::Avg => Box::<AvgAccumulator>::default(),
        AggregateFunction::Min => Box::new(ExtremumAccumulator::min()),
        AggregateFunction::Max => Box::new(ExtremumAccumulator::max()),
    };
    if distinct {
        Box::new(DistinctAccumulator {
            seen: HashSet::new(),
            inner,
        })
    } else {
        inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(mut acc: Box<dyn Accumulator>, values: &[Value]) -> Value {
        for v in values {
            acc.accumulate(v);
        }
        acc.result()
    }

    #[test]
    fn test_count_column_ignores_nulls() {
        let values = [Value::Int64(1), Value::Null, Value::Int64(2)];
        assert_eq!(run(create_accumulator(AggregateFunction::Count, true, false), &values), Value::Int64(3));
        assert_eq!(run(create_accumulator(AggregateFunction::Count, false, false), &values), Value::Int64(2));
    }

    #[test]
    fn test_sum_keeps_integers() {
        let sum = |values: &[Value]| run(create_accumulator(AggregateFunction::Sum, false, false), values);
        assert_eq!(sum(&[Value::Int64(2), Value::Int64(3)]), Value::Int64(5));
        assert_eq!(sum(&[Value::Int64(2), Value::Float64(0.5)]), Value::Float64(2.5));
        assert_eq!(sum(&[Value::Int64(i64::MAX), Value::Int64(1)]), Value::Float64(i64::MAX as f64 + 1.0));
        assert_eq!(sum(&[Value::Null]), Value::Null);
    }

    #[test]
    fn test_avg_min_max() {
        let values = [Value::Int64(10), Value::Int64(20), Value::Int64(30)];
        assert_eq!(run(create_accumulator(AggregateFunction::Avg, false, false), &values), Value::Float64(20.0));
        assert_eq!(run(create_accumulator(AggregateFunction::Min, false, false), &values), Value::Int64(10));
        assert_eq!(run(create_accumulator(AggregateFunction::Max, false, false), &values), Value::Int64(30));
        assert_eq!(run(create_accumulator(AggregateFunction::Max, false, false), &[]), Value::Null);
    }

    #[test]
    fn test_count_distinct() {
        let values = [
            Value::String("a".into()),
            Value::String("b".into()),
            Value::String("a".into()),
            Value::Null,
        ];
        assert_eq!(run(create_accumulator(AggregateFunction::Count, false, true), &values), Value::Int64(2));
    }
}
