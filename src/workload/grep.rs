//! A MapReduce-compatible implementation of `grep`.
//!

use crate::*;
use anyhow::Result;
use clap::Parser;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug, Serialize, Deserialize)]
#[clap(no_binary_name = true)]
struct Args {
    #[clap(short, long, value_parser)]
    term: String,
}

pub fn map(kv: KeyValue, aux: String) -> MapOutput {
    let args = Args::try_parse_from(serde_json::from_str::<Vec<String>>(&aux)?)?;
    let term = args.term;

    let matches = kv
        .value
        .lines()
        .enumerate()
        .filter(|(_, line)| line.contains(&term))
        .map(|(i, _)| i + 1)
        .collect::<Vec<_>>();

    let filename = kv.key;
    let iter = matches
        .into_iter()
        .map(move |line_no| Ok(KeyValue::new(filename.clone(), line_no.to_string())));
    Ok(Box::new(iter))
}

/// Emits the matching line numbers for one file, ascending and
/// comma-joined.
pub fn reduce(
    _key: String,
    values: Box<dyn Iterator<Item = String> + '_>,
    _aux: String,
) -> Result<String> {
    let mut line_nos = values
        .map(|value| value.parse::<u64>())
        .collect::<Result<Vec<_>, _>>()?;
    line_nos.sort_unstable();
    Ok(line_nos.into_iter().join(","))
}
