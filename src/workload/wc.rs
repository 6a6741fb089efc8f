//! A MapReduce-compatible implementation of word count.
//!

use crate::*;
use anyhow::Result;

pub fn map(kv: KeyValue, _aux: String) -> MapOutput {
    let words = kv
        .value
        .split(|c: char| !c.is_alphabetic())
        .filter(|s| !s.is_empty())
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>();

    let iter = words.into_iter().map(|word| Ok(KeyValue::new(word, "1")));
    Ok(Box::new(iter))
}

pub fn reduce(
    _key: String,
    values: Box<dyn Iterator<Item = String> + '_>,
    _aux: String,
) -> Result<String> {
    let mut count: u64 = 0;
    for value in values {
        count += value.parse::<u64>()?;
    }
    Ok(count.to_string())
}
