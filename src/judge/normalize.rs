//! Value normalization shared by the judges.

use std::cmp::Ordering;

use serde_json::{Number, Value};

const DECIMALS: f64 = 1e5;

const RED_ZONE: usize = 64 * 1024;
const STACK_SEGMENT: usize = 1024 * 1024;

/// Largest magnitude at which an `f64` still holds every integer exactly
const MAX_SAFE: f64 = 9_007_199_254_740_991.0;

/// Rounds every numeric leaf to 5 decimal places. Integral results are
/// stored as integers so that `1` and `1.0` compare equal.
pub fn round_numbers(value: &Value) -> Value {
    stacker::maybe_grow(RED_ZONE, STACK_SEGMENT, || match value {
        Value::Number(n) => round_number(n),
        Value::Array(items) => Value::Array(items.iter().map(round_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), round_numbers(v)))
                .collect(),
        ),
        other => other.clone(),
    })
}

fn round_number(n: &Number) -> Value {
    if n.is_i64() || n.is_u64() {
        return Value::Number(n.clone());
    }
    let Some(f) = n.as_f64() else {
        return Value::Number(n.clone());
    };
    // Near f64::MAX scaling overflows; such values carry no decimals anyway
    let scaled = f * DECIMALS;
    if !scaled.is_finite() {
        return Value::Number(n.clone());
    }
    let rounded = scaled.round() / DECIMALS;
    if rounded.fract() == 0.0 && rounded.abs() <= MAX_SAFE {
        return Value::from(rounded as i64);
    }
    Number::from_f64(rounded)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null < booleans < numbers < strings <
/// arrays < objects; arrays and objects compare lexicographically.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Sorts each nested array, then the outer array. Non-arrays are returned
/// unchanged.
pub fn normalize_order(value: &Value) -> Value {
    let Value::Array(items) = value else {
        return value.clone();
    };
    let mut items: Vec<Value> = items
        .iter()
        .map(|item| match item {
            Value::Array(inner) => {
                let mut inner = inner.clone();
                inner.sort_by(compare_values);
                Value::Array(inner)
            }
            other => other.clone(),
        })
        .collect();
    items.sort_by(compare_values);
    Value::Array(items)
}

/// Rounds both sides, optionally normalizes order, and compares.
pub fn values_equal(actual: &Value, expected: &Value, order_independent: bool) -> bool {
    let (mut a, mut e) = (round_numbers(actual), round_numbers(expected));
    if order_independent {
        a = normalize_order(&a);
        e = normalize_order(&e);
    }
    a == e
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rounding_absorbs_float_drift() {
        assert_eq!(round_numbers(&json!(0.1 + 0.2)), json!(0.3));
        assert_eq!(round_numbers(&json!(2.0)), json!(2));
        assert_eq!(round_numbers(&json!({"a": [1.000001]})), json!({"a": [1]}));
        assert_eq!(round_numbers(&json!(-0.333333333)), json!(-0.33333));
    }

    #[test]
    fn test_rounding_keeps_huge_floats() {
        assert_eq!(round_numbers(&json!(f64::MAX)), json!(f64::MAX));
        assert_eq!(round_numbers(&json!(-f64::MAX)), json!(-f64::MAX));
        assert_eq!(round_numbers(&json!(1e300)), json!(1e300));
        assert!(!values_equal(&json!([f64::MAX]), &json!([f64::MAX / 2.0]), false));
    }

    #[test]
    fn test_rounding_deeply_nested_arrays() {
        let mut value = json!(0.1 + 0.2);
        for _ in 0..2000 {
            value = json!([value]);
        }
        let mut rounded = round_numbers(&value);
        while let Value::Array(mut items) = rounded {
            rounded = items.pop().unwrap();
        }
        assert_eq!(rounded, json!(0.3));
    }

    #[test]
    fn test_integral_float_equals_integer() {
        assert!(values_equal(&json!([1.0, 2]), &json!([1, 2.0]), false));
    }

    #[test]
    fn test_order_independent_array_of_arrays() {
        let actual = json!([[3, 4], [1, 2]]);
        let expected = json!([[1, 2], [3, 4]]);
        assert!(values_equal(&actual, &expected, true));
        assert!(!values_equal(&actual, &expected, false));

        let permuted = json!([[4, 3], [2, 1]]);
        assert!(values_equal(&permuted, &expected, true));
    }

    #[test]
    fn test_order_independent_flat_array() {
        assert!(values_equal(&json!([1, 0]), &json!([0, 1]), true));
        assert!(!values_equal(&json!([1, 0]), &json!([0, 1]), false));
    }

    #[test]
    fn test_total_order_across_types() {
        let sorted = normalize_order(&json!(["b", 2, null, [1], true, "a"]));
        assert_eq!(sorted, json!([null, true, 2, "a", "b", [1]]));
    }

    #[test]
    fn test_lexicographic_outer_sort() {
        let sorted = normalize_order(&json!([[1, 3], [1, 2, 5], [0]]));
        assert_eq!(sorted, json!([[0], [1, 2, 5], [1, 3]]));
    }
}
