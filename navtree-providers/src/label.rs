//! Natural ordering of node labels.

use std::cmp::Ordering;

/// Width every run of digits is padded to before comparing
pub const NUMBER_WIDTH: usize = 20;

/// `label` with each run of ASCII digits left-padded with zeros, so that
/// plain string comparison orders embedded numbers by value
pub fn pad_numbers(label: &str) -> String {
    let mut padded = String::with_capacity(label.len() + NUMBER_WIDTH);
    let mut digits = String::new();
    for c in label.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        flush_digits(&mut padded, &mut digits);
        padded.push(c);
    }
    flush_digits(&mut padded, &mut digits);
    padded
}

fn flush_digits(out: &mut String, digits: &mut String) {
    if digits.is_empty() {
        return;
    }
    for _ in digits.len()..NUMBER_WIDTH {
        out.push('0');
    }
    out.push_str(digits);
    digits.clear();
}

/// Case-insensitive natural comparison; labels that only differ in case or
/// leading zeros fall back to the raw comparison
pub fn compare_labels(a: &str, b: &str) -> Ordering {
    pad_numbers(&a.to_lowercase())
        .cmp(&pad_numbers(&b.to_lowercase()))
        .then_with(|| a.cmp(b))
}
