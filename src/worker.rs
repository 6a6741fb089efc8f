//! The MapReduce worker.
//!
//! A worker holds no state between tasks and never assumes it is the
//! only process working on its assignment: a reaped-but-alive rival
//! may be racing it on the same task. Every output therefore goes
//! through [`crate::output::write_atomic`].

use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use dashmap::DashMap;
use itertools::Itertools;
use log::{info, warn};
use tokio::time::sleep;
use tonic::transport::Channel;

use crate::rpc::coordinator_client::CoordinatorClient;
use crate::rpc::{GetTaskRequest, ReportTaskRequest, TaskType};
use crate::{codec, ihash, intermediate_file, output, output_file, KeyValue, Workload};

type BucketIndex = u32;
type Buckets = DashMap<BucketIndex, Vec<KeyValue>>;

/// How long to sleep when the coordinator has nothing to hand out yet.
const IDLE_BACKOFF: Duration = Duration::from_secs(1);

/// Ask the coordinator for tasks until the job is done.
///
/// `aux` is the JSON-encoded argument vector for the workload, and
/// `work_dir` is the directory shared with the coordinator where all
/// intermediate and final files live. Failing to connect at startup is
/// an error; losing the coordinator later is the normal drain path and
/// returns `Ok`.
pub async fn run(
    endpoint: String,
    workload: Workload,
    aux: String,
    work_dir: impl AsRef<Path>,
) -> Result<()> {
    let work_dir = work_dir.as_ref();
    let mut client = CoordinatorClient::connect(endpoint.clone())
        .await
        .with_context(|| format!("cannot reach coordinator at {endpoint}"))?;

    loop {
        let reply = match client.get_task(GetTaskRequest {}).await {
            Ok(response) => response.into_inner(),
            // The coordinator tears its endpoint down once the job is
            // done, so an unreachable coordinator means we are finished.
            Err(status) => {
                info!("coordinator unreachable ({status}), exiting");
                return Ok(());
            }
        };

        match reply.task_type() {
            TaskType::Map => {
                let result = perform_map(
                    work_dir,
                    &reply.file,
                    reply.task_id,
                    reply.n_reduce,
                    &workload,
                    &aux,
                );
                report(&mut client, TaskType::Map, reply.task_id, result).await;
            }
            TaskType::Reduce => {
                let result = perform_reduce(work_dir, &reply.files, reply.task_id, &workload, &aux);
                report(&mut client, TaskType::Reduce, reply.task_id, result).await;
            }
            TaskType::Wait => sleep(IDLE_BACKOFF).await,
            TaskType::Exit => {
                info!("all tasks complete, exiting");
                return Ok(());
            }
        }
    }
}

/// Report the outcome of one task execution.
async fn report(
    client: &mut CoordinatorClient<Channel>,
    task_type: TaskType,
    task_id: u32,
    result: Result<()>,
) {
    let success = match result {
        Ok(()) => true,
        Err(err) => {
            warn!("{task_type:?} task {task_id} failed: {err:#}");
            false
        }
    };
    let request = ReportTaskRequest {
        task_type: task_type as i32,
        task_id,
        success,
    };
    // An undelivered report looks like a crash to the coordinator; the
    // stall reaper covers it either way.
    if let Err(status) = client.report_task(request).await {
        warn!("could not report {task_type:?} task {task_id}: {status}");
    }
}

/// Execute one map task: read the input, run the application map
/// function, partition by key hash, and write all `n_reduce`
/// intermediate files atomically.
///
/// Every bucket gets a file even when empty, so reducers never have to
/// guess whether a missing file means "no records" or "map failed".
pub fn perform_map(
    work_dir: &Path,
    input: &str,
    task_id: u32,
    n_reduce: u32,
    workload: &Workload,
    aux: &str,
) -> Result<()> {
    anyhow::ensure!(n_reduce > 0, "map task needs a positive reduce fan-out");
    let contents =
        fs::read_to_string(input).with_context(|| format!("cannot read input file {input}"))?;
    let input_kv = KeyValue::new(input, contents);

    let buckets: Buckets = Buckets::new();
    let map_fn = workload.map_fn;
    for item in map_fn(input_kv, aux.to_string())? {
        let KeyValue { key, value } = item?;
        let bucket_no = ihash(key.as_bytes()) % n_reduce;
        #[allow(clippy::unwrap_or_default)]
        buckets
            .entry(bucket_no)
            .or_insert(Vec::new())
            .push(KeyValue { key, value });
    }

    for bucket_no in 0..n_reduce {
        let records = buckets
            .remove(&bucket_no)
            .map(|(_, kvs)| kvs)
            .unwrap_or_default();
        let path = work_dir.join(intermediate_file(task_id, bucket_no));
        output::write_atomic(&path, |w| codec::write_records(w, &records))?;
    }
    Ok(())
}

/// Execute one reduce task: decode every intermediate file for this
/// bucket, sort, group runs of equal keys, apply the application
/// reduce function, and write the final output atomically.
pub fn perform_reduce(
    work_dir: &Path,
    inputs: &[String],
    task_id: u32,
    workload: &Workload,
    aux: &str,
) -> Result<()> {
    let mut records: Vec<KeyValue> = Vec::new();
    for name in inputs {
        let path = work_dir.join(name);
        let file = match File::open(&path) {
            Ok(file) => file,
            // Tolerated for interoperability with map implementations
            // that skip empty buckets.
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("cannot open {}", path.display()))
            }
        };
        records.extend(codec::read_records(BufReader::new(file))?);
    }

    // Stable sort: values keep their file order within each key run.
    records.sort_by(|a, b| a.key.cmp(&b.key));

    let reduce_fn = workload.reduce_fn;
    let path = work_dir.join(output_file(task_id));
    output::write_atomic(&path, |w| {
        for (key, value_group) in &records.into_iter().chunk_by(KeyValue::key) {
            let values = value_group.map(KeyValue::into_value);
            let out = reduce_fn(key.clone(), Box::new(values), aux.to_string())?;
            writeln!(w, "{} {}", key, out)?;
        }
        Ok(())
    })
}
