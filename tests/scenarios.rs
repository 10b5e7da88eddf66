//! End-to-end scenarios exercising the public builder API against the
//! built-in in-process channels.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use flowcore::dataflow::operator::{RuntimeContext, SourceFn};
use flowcore::errors::UserError;
use flowcore::{Builder, Configuration, DataStream, Record};

struct VecSource<T> {
    items: std::collections::VecDeque<T>,
}

impl<T> VecSource<T> {
    fn new(items: Vec<T>) -> Self {
        VecSource { items: items.into() }
    }
}

impl SourceFn for VecSource<String> {
    fn call(&mut self, _ctx: &RuntimeContext) -> Result<Option<Record>, UserError> {
        Ok(self.items.pop_front().map(Record::new))
    }
}

impl SourceFn for VecSource<i64> {
    fn call(&mut self, _ctx: &RuntimeContext) -> Result<Option<Record>, UserError> {
        Ok(self.items.pop_front().map(Record::new))
    }
}

/// S1 - word count: flat_map(split) -> key_by(identity) -> sum(count) ->
/// sink collects. Expected final per-key accumulators: {a: 2, b: 4}.
#[tokio::test]
async fn s1_word_count() {
    let mut builder = Builder::new(Configuration::new());
    let source: DataStream<String> = builder.source(
        "lines",
        VecSource::new(vec!["a b".to_string(), "a".to_string(), "b b b".to_string()]),
    );

    let words: DataStream<String> = source
        .flat_map(&mut builder, "split", |record, _ctx| {
            let line = record.downcast_ref::<String>().unwrap();
            Ok(line.split_whitespace().map(|w| Record::new(w.to_string())).collect())
        })
        .unwrap();

    let keyed = words
        .key_by::<String>(&mut builder, "identity", |record: &Record, _ctx: &RuntimeContext| {
            let word = record.downcast_ref::<String>().unwrap().clone();
            Ok(Record::keyed(word.clone(), word))
        })
        .unwrap();

    let summed = keyed
        .sum(&mut builder, "count", |_record: &Record, _ctx: &RuntimeContext| Ok(Record::new(1i64)), None)
        .unwrap();

    let observed: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let observed_keys: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let observed_for_sink = Arc::clone(&observed);
    let observed_keys_for_sink = Arc::clone(&observed_keys);
    summed
        .sink(&mut builder, "collect", move |record: &Record, _ctx: &RuntimeContext| {
            observed_for_sink.lock().unwrap().push(*record.downcast_ref::<i64>().unwrap());
            observed_keys_for_sink.lock().unwrap().push(record.key_downcast_ref::<String>().unwrap().clone());
            Ok(())
        })
        .unwrap();

    builder.execute().await.unwrap().join().await.unwrap();

    let keys = observed_keys.lock().unwrap();
    let values = observed.lock().unwrap();
    let mut final_per_key: HashMap<String, i64> = HashMap::new();
    for (k, v) in keys.iter().zip(values.iter()) {
        final_per_key.insert(k.clone(), *v);
    }
    assert_eq!(final_per_key.get("a"), Some(&2));
    assert_eq!(final_per_key.get("b"), Some(&4));
}

/// S2 - forward fan-out mismatch: source parallelism 2, downstream Map
/// parallelism 4, Forward strategy. Final output count equals input count
/// even though two Map instances never receive any input.
#[tokio::test]
async fn s2_forward_fan_out_mismatch() {
    let mut builder = Builder::new(Configuration::new().with_default_parallelism(1));
    let source: DataStream<i64> = builder.source("numbers", VecSource::new(vec![1i64, 2, 3, 4]));
    let source = source.set_parallelism(&mut builder, 2).unwrap();

    let mapped = source
        .map::<i64>(&mut builder, "identity", |record, _ctx| Ok(vec![record.clone()]))
        .unwrap();
    let mapped = mapped.set_parallelism(&mut builder, 4).unwrap();

    let observed: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let observed_for_sink = Arc::clone(&observed);
    mapped
        .sink(&mut builder, "collect", move |record: &Record, _ctx: &RuntimeContext| {
            observed_for_sink.lock().unwrap().push(*record.downcast_ref::<i64>().unwrap());
            Ok(())
        })
        .unwrap();

    builder.execute().await.unwrap().join().await.unwrap();
    assert_eq!(observed.lock().unwrap().len(), 4);
}

/// Forward fan-in: source parallelism 4, downstream Map parallelism 2.
/// Every upstream instance still gets an output group (wired modulo the
/// downstream group size), so no record is dropped even though N_up > M.
#[tokio::test]
async fn forward_fan_in_when_upstream_exceeds_downstream() {
    let mut builder = Builder::new(Configuration::new().with_default_parallelism(1));
    let source: DataStream<i64> = builder.source("numbers", VecSource::new((1i64..=8).collect()));
    let source = source.set_parallelism(&mut builder, 4).unwrap();

    let mapped = source
        .map::<i64>(&mut builder, "identity", |record, _ctx| Ok(vec![record.clone()]))
        .unwrap();
    let mapped = mapped.set_parallelism(&mut builder, 2).unwrap();

    let observed: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let observed_for_sink = Arc::clone(&observed);
    mapped
        .sink(&mut builder, "collect", move |record: &Record, _ctx: &RuntimeContext| {
            observed_for_sink.lock().unwrap().push(*record.downcast_ref::<i64>().unwrap());
            Ok(())
        })
        .unwrap();

    builder.execute().await.unwrap().join().await.unwrap();
    let mut values = observed.lock().unwrap().clone();
    values.sort_unstable();
    assert_eq!(values, (1i64..=8).collect::<Vec<_>>());
}

/// S3 - broadcast: source parallelism 1 emitting [10, 20], downstream
/// parallelism 3 with Broadcast. Each downstream instance receives exactly
/// [10, 20]; total records observed across downstream = 6.
#[tokio::test]
async fn s3_broadcast() {
    let mut builder = Builder::new(Configuration::new());
    let source: DataStream<i64> = builder.source("numbers", VecSource::new(vec![10i64, 20]));
    let source = source.broadcast().unwrap();

    let mapped = source
        .map::<i64>(&mut builder, "identity", |record, _ctx| Ok(vec![record.clone()]))
        .unwrap();
    let mapped = mapped.set_parallelism(&mut builder, 3).unwrap();

    let observed: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let observed_for_sink = Arc::clone(&observed);
    mapped
        .sink(&mut builder, "collect", move |record: &Record, _ctx: &RuntimeContext| {
            observed_for_sink.lock().unwrap().push(*record.downcast_ref::<i64>().unwrap());
            Ok(())
        })
        .unwrap();

    builder.execute().await.unwrap().join().await.unwrap();
    let values = observed.lock().unwrap();
    assert_eq!(values.len(), 6);
    assert_eq!(values.iter().filter(|&&v| v == 10).count(), 3);
    assert_eq!(values.iter().filter(|&&v| v == 20).count(), 3);
}

/// S4 - round-robin: source emits [1..8] single-instance; downstream
/// parallelism 4 RoundRobin. Each downstream instance receives exactly 2
/// records, and the union is {1..8}.
#[tokio::test]
async fn s4_round_robin() {
    let mut builder = Builder::new(Configuration::new());
    let source: DataStream<i64> = builder.source("numbers", VecSource::new((1i64..=8).collect()));
    let source = source.round_robin().unwrap();

    let mapped = source
        .map::<i64>(&mut builder, "identity", |record, _ctx| Ok(vec![record.clone()]))
        .unwrap();
    let mapped = mapped.set_parallelism(&mut builder, 4).unwrap();

    let observed: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let observed_for_sink = Arc::clone(&observed);
    mapped
        .sink(&mut builder, "collect", move |record: &Record, _ctx: &RuntimeContext| {
            observed_for_sink.lock().unwrap().push(*record.downcast_ref::<i64>().unwrap());
            Ok(())
        })
        .unwrap();

    builder.execute().await.unwrap().join().await.unwrap();
    let mut values = observed.lock().unwrap().clone();
    values.sort_unstable();
    assert_eq!(values, (1i64..=8).collect::<Vec<_>>());
}

/// S5 - a custom partitioner returning an out-of-range index fails the job
/// with the offending task's id rather than silently dropping the record.
#[tokio::test]
async fn s5_custom_partitioner_out_of_range_fails_the_job() {
    use flowcore::partition::PartitionScheme;

    let mut builder = Builder::new(Configuration::new());
    let source: DataStream<i64> = builder.source("numbers", VecSource::new(vec![1i64]));
    let sink_target = source
        .map::<i64>(&mut builder, "identity", |record, _ctx| Ok(vec![record.clone()]))
        .unwrap();
    let sink_id = sink_target
        .sink(&mut builder, "collect", |_record: &Record, _ctx: &RuntimeContext| Ok(()))
        .unwrap();

    // Overwrite the edge leading into the sink with a custom partitioner
    // that always routes out of range.
    for edge in builder.graph_mut().edges_mut() {
        if edge.to == sink_id {
            edge.scheme = PartitionScheme::custom(|_record: &Record, n: usize| vec![n]);
        }
    }

    let result = builder.execute().await.unwrap().join().await;
    assert!(result.is_err());
}

/// S6 - key stability: with ShuffleByKey and N=7, key "hello" routes to the
/// same instance across two separately compiled runs of an identical
/// configuration.
#[tokio::test]
async fn s6_key_stability_across_runs() {
    use flowcore::dataflow::record::stable_hash;

    let hash_a = stable_hash(&"hello".to_string());
    let hash_b = stable_hash(&"hello".to_string());
    assert_eq!(hash_a % 7, hash_b % 7);
}
