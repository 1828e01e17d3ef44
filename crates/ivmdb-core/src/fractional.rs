//! Fractional indexing.
//!
//! Generates string keys that sort, under plain byte-wise comparison, in the
//! order they were assigned, and that always admit a new key strictly
//! between any two existing ones without touching either.
//!
//! A key is an *integer part* followed by an optional *fraction*. The
//! integer part starts with a head character whose value fixes the number of
//! digits that follow (`a`-`z` for growing positive lengths, `Z`-`A` for
//! growing negative lengths), which keeps integer parts ordered by value.
//! The fraction is a base-62 digit string without trailing zeros, so there is
//! always room to subdivide further.

use crate::error::{Error, Result};

/// Digits in ascending byte order.
pub const BASE_62_DIGITS: &[u8; 62] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Key assigned when nothing else exists yet.
pub const INTEGER_ZERO: &str = "a0";

const SMALLEST_INTEGER: &str = "A00000000000000000000000000";

fn invalid(msg: impl Into<String>) -> Error {
    Error::FractionalIndex(msg.into())
}

fn digit_value(c: u8) -> Result<usize> {
    BASE_62_DIGITS
        .iter()
        .position(|&d| d == c)
        .ok_or_else(|| invalid(format!("invalid digit {:?}", c as char)))
}

fn to_string(bytes: Vec<u8>) -> String {
    bytes.into_iter().map(char::from).collect()
}

/// Digit string strictly between `a` and `b` (or above `a` when `b` is
/// unbounded). Both are fractions: no trailing zeros, `a < b`.
fn midpoint(a: &[u8], b: Option<&[u8]>) -> Result<Vec<u8>> {
    let zero = BASE_62_DIGITS[0];
    if let Some(b) = b {
        if a >= b {
            return Err(invalid(format!(
                "{} >= {}",
                to_string(a.to_vec()),
                to_string(b.to_vec())
            )));
        }
    }
    if a.last() == Some(&zero) || b.and_then(<[u8]>::last) == Some(&zero) {
        return Err(invalid("trailing zero"));
    }

    if let Some(b) = b {
        // Shared prefix, treating `a` as padded with zeros.
        let mut n = 0;
        while n < b.len() && a.get(n).copied().unwrap_or(zero) == b[n] {
            n += 1;
        }
        if n > 0 {
            let rest_a = a.get(n..).unwrap_or(&[]);
            let mut out = b[..n].to_vec();
            out.extend(midpoint(rest_a, Some(&b[n..]))?);
            return Ok(out);
        }
    }

    // First digits differ.
    let digit_a = match a.first() {
        Some(&c) => digit_value(c)?,
        None => 0,
    };
    let digit_b = match b {
        Some(b) => digit_value(b[0])?,
        None => BASE_62_DIGITS.len(),
    };

    if digit_b - digit_a > 1 {
        let mid = (digit_a + digit_b + 1) / 2;
        return Ok(vec![BASE_62_DIGITS[mid]]);
    }

    // Consecutive first digits.
    match b {
        Some(b) if b.len() > 1 => Ok(vec![b[0]]),
        _ => {
            let mut out = vec![BASE_62_DIGITS[digit_a]];
            out.extend(midpoint(a.get(1..).unwrap_or(&[]), None)?);
            Ok(out)
        }
    }
}

fn integer_length(head: u8) -> Result<usize> {
    match head {
        b'a'..=b'z' => Ok((head - b'a') as usize + 2),
        b'A'..=b'Z' => Ok((b'Z' - head) as usize + 2),
        _ => Err(invalid(format!("invalid order key head {:?}", head as char))),
    }
}

fn integer_part(key: &[u8]) -> Result<&[u8]> {
    let head = *key.first().ok_or_else(|| invalid("empty order key"))?;
    let len = integer_length(head)?;
    if len > key.len() {
        return Err(invalid(format!("invalid order key {}", to_string(key.to_vec()))));
    }
    Ok(&key[..len])
}

fn validate_integer(int: &[u8]) -> Result<()> {
    let head = *int.first().ok_or_else(|| invalid("empty integer part"))?;
    if int.len() != integer_length(head)? {
        return Err(invalid(format!("invalid integer part {}", to_string(int.to_vec()))));
    }
    Ok(())
}

/// Check that a key is well formed.
pub fn validate_order_key(key: &str) -> Result<()> {
    if key == SMALLEST_INTEGER {
        return Err(invalid(format!("invalid order key {key}")));
    }
    let bytes = key.as_bytes();
    let int = integer_part(bytes)?;
    if bytes[int.len()..].last() == Some(&BASE_62_DIGITS[0]) {
        return Err(invalid(format!("invalid order key {key}")));
    }
    Ok(())
}

fn increment_integer(x: &[u8]) -> Result<Option<Vec<u8>>> {
    validate_integer(x)?;
    let head = x[0];
    let mut digits = x[1..].to_vec();
    let mut carry = true;
    for digit in digits.iter_mut().rev() {
        if !carry {
            break;
        }
        let d = digit_value(*digit)? + 1;
        if d == BASE_62_DIGITS.len() {
            *digit = BASE_62_DIGITS[0];
        } else {
            *digit = BASE_62_DIGITS[d];
            carry = false;
        }
    }

    if carry {
        if head == b'Z' {
            return Ok(Some(vec![b'a', BASE_62_DIGITS[0]]));
        }
        if head == b'z' {
            return Ok(None);
        }
        let h = head + 1;
        if h > b'a' {
            digits.push(BASE_62_DIGITS[0]);
        } else {
            digits.pop();
        }
        let mut out = vec![h];
        out.extend(digits);
        return Ok(Some(out));
    }

    let mut out = vec![head];
    out.extend(digits);
    Ok(Some(out))
}

fn decrement_integer(x: &[u8]) -> Result<Option<Vec<u8>>> {
    validate_integer(x)?;
    let head = x[0];
    let largest = BASE_62_DIGITS[BASE_62_DIGITS.len() - 1];
    let mut digits = x[1..].to_vec();
    let mut borrow = true;
    for digit in digits.iter_mut().rev() {
        if !borrow {
            break;
        }
        let d = digit_value(*digit)?;
        if d == 0 {
            *digit = largest;
        } else {
            *digit = BASE_62_DIGITS[d - 1];
            borrow = false;
        }
    }

    if borrow {
        if head == b'a' {
            return Ok(Some(vec![b'Z', largest]));
        }
        if head == b'A' {
            return Ok(None);
        }
        let h = head - 1;
        if h < b'Z' {
            digits.push(largest);
        } else {
            digits.pop();
        }
        let mut out = vec![h];
        out.extend(digits);
        return Ok(Some(out));
    }

    let mut out = vec![head];
    out.extend(digits);
    Ok(Some(out))
}

/// Generate a key strictly between `a` and `b`.
///
/// `None` stands for "before everything" (for `a`) or "after everything"
/// (for `b`). Fails if `a >= b` or either key is malformed.
pub fn generate_key_between(a: Option<&str>, b: Option<&str>) -> Result<String> {
    if let Some(a) = a {
        validate_order_key(a)?;
    }
    if let Some(b) = b {
        validate_order_key(b)?;
    }

    match (a, b) {
        (None, None) => Ok(INTEGER_ZERO.to_string()),
        (None, Some(b)) => {
            let b = b.as_bytes();
            let ib = integer_part(b)?;
            let fb = &b[ib.len()..];
            if ib == SMALLEST_INTEGER.as_bytes() {
                let mut out = ib.to_vec();
                out.extend(midpoint(&[], Some(fb))?);
                return Ok(to_string(out));
            }
            if ib < b {
                return Ok(to_string(ib.to_vec()));
            }
            decrement_integer(ib)?
                .map(to_string)
                .ok_or_else(|| invalid("cannot decrement any more"))
        }
        (Some(a), None) => {
            let a = a.as_bytes();
            let ia = integer_part(a)?;
            let fa = &a[ia.len()..];
            match increment_integer(ia)? {
                Some(i) => Ok(to_string(i)),
                None => {
                    let mut out = ia.to_vec();
                    out.extend(midpoint(fa, None)?);
                    Ok(to_string(out))
                }
            }
        }
        (Some(a), Some(b)) => {
            if a >= b {
                return Err(invalid(format!("{a} >= {b}")));
            }
            let (a, b) = (a.as_bytes(), b.as_bytes());
            let ia = integer_part(a)?;
            let fa = &a[ia.len()..];
            let ib = integer_part(b)?;
            let fb = &b[ib.len()..];

            if ia == ib {
                let mut out = ia.to_vec();
                out.extend(midpoint(fa, Some(fb))?);
                return Ok(to_string(out));
            }

            let i = increment_integer(ia)?.ok_or_else(|| invalid("cannot increment any more"))?;
            if i.as_slice() < b {
                return Ok(to_string(i));
            }
            let mut out = ia.to_vec();
            out.extend(midpoint(fa, None)?);
            Ok(to_string(out))
        }
    }
}

/// Generate `n` ordered keys strictly between `a` and `b`.
pub fn generate_n_keys_between(a: Option<&str>, b: Option<&str>, n: usize) -> Result<Vec<String>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    if n == 1 {
        return Ok(vec![generate_key_between(a, b)?]);
    }
    match (a, b) {
        (_, None) => {
            let mut keys = Vec::with_capacity(n);
            let mut prev = generate_key_between(a, None)?;
            for _ in 1..n {
                let next = generate_key_between(Some(&prev), None)?;
                keys.push(std::mem::replace(&mut prev, next));
            }
            keys.push(prev);
            Ok(keys)
        }
        (None, Some(_)) => {
            let mut keys = Vec::with_capacity(n);
            let mut next = generate_key_between(None, b)?;
            for _ in 1..n {
                let prev = generate_key_between(None, Some(&next))?;
                keys.push(std::mem::replace(&mut next, prev));
            }
            keys.push(next);
            keys.reverse();
            Ok(keys)
        }
        (Some(_), Some(_)) => {
            let mid = n / 2;
            let c = generate_key_between(a, b)?;
            let mut keys = generate_n_keys_between(a, Some(&c), mid)?;
            keys.push(c.clone());
            keys.extend(generate_n_keys_between(Some(&c), b, n - mid - 1)?);
            Ok(keys)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn between(a: Option<&str>, b: Option<&str>) -> String {
        generate_key_between(a, b).unwrap()
    }

    #[test]
    fn test_generate_key_between_known_values() {
        assert_eq!(between(None, None), "a0");
        assert_eq!(between(None, Some("a0")), "Zz");
        assert_eq!(between(None, Some("Zz")), "Zy");
        assert_eq!(between(Some("a0"), None), "a1");
        assert_eq!(between(Some("a1"), None), "a2");
        assert_eq!(between(Some("a0"), Some("a1")), "a0V");
        assert_eq!(between(Some("a1"), Some("a2")), "a1V");
        assert_eq!(between(Some("a0V"), Some("a1")), "a0l");
        assert_eq!(between(Some("Zz"), Some("a0")), "ZzV");
        assert_eq!(between(Some("Zz"), Some("a1")), "a0");
        assert_eq!(between(None, Some("Y00")), "Xzzz");
        assert_eq!(between(Some("bzz"), None), "c000");
        assert_eq!(between(Some("a0"), Some("a0V")), "a0G");
        assert_eq!(between(Some("a0"), Some("a0G")), "a08");
        assert_eq!(between(Some("b125"), Some("b129")), "b127");
        assert_eq!(between(Some("a0"), Some("a1V")), "a1");
        assert_eq!(between(Some("Zz"), Some("a01")), "a0");
        assert_eq!(between(None, Some("a0V")), "a0");
        assert_eq!(between(None, Some("b999")), "b99");
    }

    #[test]
    fn test_generate_key_between_extremes() {
        assert_eq!(
            between(None, Some("A000000000000000000000000001")),
            "A000000000000000000000000000V"
        );
        assert_eq!(
            between(Some("zzzzzzzzzzzzzzzzzzzzzzzzzzy"), None),
            "zzzzzzzzzzzzzzzzzzzzzzzzzzz"
        );
        assert_eq!(
            between(Some("zzzzzzzzzzzzzzzzzzzzzzzzzzz"), None),
            "zzzzzzzzzzzzzzzzzzzzzzzzzzzV"
        );
    }

    #[test]
    fn test_generate_key_between_errors() {
        assert!(generate_key_between(None, Some("A00000000000000000000000000")).is_err());
        assert!(generate_key_between(Some("a00"), None).is_err());
        assert!(generate_key_between(Some("a00"), Some("a1")).is_err());
        assert!(generate_key_between(Some("0"), Some("1")).is_err());
        assert!(generate_key_between(Some("a1"), Some("a0")).is_err());
    }

    #[test]
    fn test_generate_n_keys_between() {
        let keys = generate_n_keys_between(None, None, 5).unwrap();
        assert_eq!(keys, vec!["a0", "a1", "a2", "a3", "a4"]);

        let keys = generate_n_keys_between(Some("a0"), Some("a1"), 4).unwrap();
        assert_eq!(keys.len(), 4);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert!(keys.iter().all(|k| k.as_str() > "a0" && k.as_str() < "a1"));
    }

    #[test]
    fn test_repeated_head_insertions_stay_ordered() {
        let mut first = between(None, None);
        for _ in 0..200 {
            let next = between(None, Some(&first));
            assert!(next < first);
            first = next;
        }
    }

    proptest! {
        #[test]
        fn prop_keys_between_neighbors_stay_ordered(positions in prop::collection::vec(0usize..1000, 1..80)) {
            let mut keys: Vec<String> = Vec::new();
            for p in positions {
                let at = p % (keys.len() + 1);
                let before = at.checked_sub(1).map(|i| keys[i].as_str());
                let after = keys.get(at).map(String::as_str);
                let key = generate_key_between(before, after).unwrap();
                if let Some(b) = before {
                    prop_assert!(b < key.as_str());
                }
                if let Some(a) = after {
                    prop_assert!(key.as_str() < a);
                }
                keys.insert(at, key);
            }
            prop_assert!(keys.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
