//! Value ordering under ORDER BY options.

use std::cmp::Ordering;

use ivmdb_proto::{CompareOptions, Direction, NullsOrder, StringSort, Value};

/// Compare two values under the given options.
///
/// Null placement follows `options.nulls` regardless of direction. Numbers
/// compare numerically across integers and floats, arrays element by element,
/// and locale string sort compares case-insensitively before falling back to
/// a plain lexical comparison.
pub fn compare_values(a: &Value, b: &Value, options: &CompareOptions) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return nulls_position(options.nulls),
        (false, true) => return nulls_position(options.nulls).reverse(),
        (false, false) => {}
    }

    let ordering = compare_non_null(a, b, options);
    match options.direction {
        Direction::Asc => ordering,
        Direction::Desc => ordering.reverse(),
    }
}

fn nulls_position(nulls: NullsOrder) -> Ordering {
    match nulls {
        NullsOrder::First => Ordering::Less,
        NullsOrder::Last => Ordering::Greater,
    }
}

fn compare_non_null(a: &Value, b: &Value, options: &CompareOptions) -> Ordering {
    if let Some(ordering) = a.numeric_cmp(b) {
        return ordering;
    }

    match (a, b) {
        (Value::String(a), Value::String(b)) => match options.string_sort {
            StringSort::Lexical => a.cmp(b),
            StringSort::Locale => locale_cmp(a, b),
        },
        (Value::Array(a), Value::Array(b)) => {
            // Elements use ascending order; direction is applied once at the top.
            let element_options = CompareOptions {
                direction: Direction::Asc,
                ..*options
            };
            a.iter()
                .zip(b.iter())
                .map(|(x, y)| compare_values(x, y, &element_options))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len()))
        }
        _ => a.cmp(b),
    }
}

fn locale_cmp(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
        .then_with(|| a.cmp(b))
}

/// Compare two lists of sort values clause by clause.
///
/// `options` holds one entry per clause; missing values compare as null.
pub fn compare_tuples(a: &[Value], b: &[Value], options: &[CompareOptions]) -> Ordering {
    for (i, opts) in options.iter().enumerate() {
        let x = a.get(i).unwrap_or(&Value::Null);
        let y = b.get(i).unwrap_or(&Value::Null);
        let ordering = compare_values(x, y, opts);
        if ordering.is_ne() {
            return ordering;
        }
    }
    a.len().cmp(&b.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut values: Vec<Value>, options: CompareOptions) -> Vec<Value> {
        values.sort_by(|a, b| compare_values(a, b, &options));
        values
    }

    #[test]
    fn test_numbers_compare_across_types() {
        let values = vec![Value::Float(2.5), Value::Int(3), Value::Int(1)];
        assert_eq!(
            sorted(values, CompareOptions::asc()),
            vec![Value::Int(1), Value::Float(2.5), Value::Int(3)]
        );
    }

    #[test]
    fn test_nulls_placement_is_independent_of_direction() {
        let values = vec![Value::Int(1), Value::Null, Value::Int(2)];

        let asc = sorted(values.clone(), CompareOptions::asc());
        assert_eq!(asc, vec![Value::Null, Value::Int(1), Value::Int(2)]);

        let desc = sorted(values.clone(), CompareOptions::desc());
        assert_eq!(desc, vec![Value::Null, Value::Int(2), Value::Int(1)]);

        let desc_last = sorted(values, CompareOptions::desc().with_nulls(NullsOrder::Last));
        assert_eq!(desc_last, vec![Value::Int(2), Value::Int(1), Value::Null]);
    }

    #[test]
    fn test_locale_sort_ignores_case() {
        let values = vec![Value::from("b"), Value::from("B"), Value::from("a")];
        let lexical = sorted(values.clone(), CompareOptions::asc());
        assert_eq!(lexical, vec![Value::from("B"), Value::from("a"), Value::from("b")]);

        let locale = sorted(
            values,
            CompareOptions::asc().with_string_sort(StringSort::Locale),
        );
        assert_eq!(locale, vec![Value::from("a"), Value::from("B"), Value::from("b")]);
    }

    #[test]
    fn test_arrays_compare_elementwise() {
        let options = CompareOptions::asc();
        let short = Value::Array(vec![Value::Int(1)]);
        let long = Value::Array(vec![Value::Int(1), Value::Int(0)]);
        let bigger = Value::Array(vec![Value::Int(2)]);
        assert_eq!(compare_values(&short, &long, &options), Ordering::Less);
        assert_eq!(compare_values(&long, &bigger, &options), Ordering::Less);
    }

    #[test]
    fn test_compare_tuples_uses_each_clause() {
        let options = [CompareOptions::asc(), CompareOptions::desc()];
        let a = [Value::from("x"), Value::Int(1)];
        let b = [Value::from("x"), Value::Int(2)];
        assert_eq!(compare_tuples(&a, &b, &options), Ordering::Greater);
    }
}
