//! Sequential in-process execution of a whole job.
//!
//! Functionally equivalent to one coordinator with one worker, minus
//! the RPC round trips; the distributed path is expected to produce
//! the same output multiset, which is what the integration tests
//! check it against.

use anyhow::Result;
use dashmap::DashMap;
use glob::glob;
use itertools::Itertools;
use std::fs::{self, File};
use std::io::{Read, Write};

use crate::standalone::Job;
use crate::*;

// types related to this engine
type BucketIndex = u32;
type Buckets = DashMap<BucketIndex, Vec<KeyValue>>;

pub fn perform_map(
    job: &Job,
    engine: &Workload,
    aux: &str,
    n_reduce: u32,
) -> Result<Buckets> {
    let input_files = glob(&job.input)?;
    let buckets: Buckets = Buckets::new();
    for pathspec in input_files.flatten() {
        let mut buf = String::new();
        {
            // a scope so that the file is closed right after reading
            let mut file = File::open(&pathspec)?;
            file.read_to_string(&mut buf)?;
        }
        let filename = pathspec.to_str().unwrap_or("unknown").to_string();
        let input_kv = KeyValue::new(filename, buf);
        let map_fn = engine.map_fn;
        // Each mapped pair lands in a bucket according to its hashed
        // key, exactly as the distributed workers shard their output.
        for item in map_fn(input_kv, aux.to_string())? {
            let KeyValue { key, value } = item?;
            let bucket_no = ihash(key.as_bytes()) % n_reduce;

            #[allow(clippy::unwrap_or_default)]
            buckets
                .entry(bucket_no)
                .or_insert(Vec::new())
                .push(KeyValue { key, value });
        }
    }

    Ok(buckets)
}

pub fn perform_reduce(
    job: &Job,
    engine: &Workload,
    aux: &str,
    n_reduce: u32,
    buckets: Buckets,
) -> Result<()> {
    let reduce_fn = engine.reduce_fn;
    let output_dir = &job.output;
    fs::create_dir_all(output_dir)?;
    for reduce_id in 0..n_reduce {
        let mut bkt = buckets
            .remove(&reduce_id)
            .map(|(_, kvs)| kvs)
            .unwrap_or_default();
        let out_pathspec = format!("{}/{}", output_dir, output_file(reduce_id));
        let mut out_file = File::create(&out_pathspec)?;
        bkt.sort_by(|a, b| a.key.cmp(&b.key));
        for (key, value_group) in &bkt.into_iter().chunk_by(KeyValue::key) {
            let iter = value_group.map(KeyValue::into_value);
            let out = reduce_fn(key.clone(), Box::new(iter), aux.to_string())?;
            writeln!(out_file, "{} {}", key, out)?;
        }
    }
    Ok(())
}
