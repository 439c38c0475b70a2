use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use cleanstream::pipeline::{Pipeline, PipelineOptions};
use cleanstream::rules::{
    Dictionaries, ImputeStrategy, InvalidPolicy, RuleConfig, RuleSpec, StringOp,
};
use cleanstream::types::{DataType, Field, Schema, Table, Value};
use cleanstream::worker::DuplicateDetection;

fn generate_table(rows: usize) -> Table {
    let schema = Schema::new(vec![
        Field::new("id", DataType::Int64),
        Field::new("age", DataType::Int64),
        Field::new("email", DataType::Utf8),
        Field::new("country", DataType::Utf8),
        Field::new("salary", DataType::Float64),
    ]);
    let countries = ["mx", "Mexico", "usa", " US ", "canada"];
    let data = (0..rows)
        .map(|i| {
            // Every 20th row repeats its predecessor apart from the id.
            let src = if i % 20 == 19 { i - 1 } else { i };
            let age = if src % 7 == 0 {
                Value::Null
            } else {
                Value::Int64(18 + (src % 60) as i64)
            };
            let email = if src % 50 == 0 {
                Value::Utf8(format!("user{src}-at-example"))
            } else {
                Value::Utf8(format!(" User{src}@Example.com "))
            };
            let salary = if src % 97 == 0 {
                10_000_000.0
            } else {
                20_000.0 + (src % 1_000) as f64 * 75.0
            };
            vec![
                Value::Int64(i as i64),
                age,
                email,
                Value::Utf8(countries[src % countries.len()].to_string()),
                Value::Float64(salary),
            ]
        })
        .collect();
    Table::new(schema, data)
}

fn rules() -> (RuleConfig, Dictionaries) {
    let rules = RuleConfig::new()
        .with_rule(
            "email",
            RuleSpec::StringNormalize {
                operations: vec![StringOp::Trim, StringOp::Lowercase],
                validation: true,
                on_invalid: InvalidPolicy::DropRow,
            },
        )
        .with_rule(
            "country",
            RuleSpec::DictionaryReplace {
                dictionary: "countries".to_string(),
            },
        )
        .with_rule(
            "age",
            RuleSpec::MissingImpute {
                strategy: ImputeStrategy::Mean,
            },
        )
        .with_rule("salary", RuleSpec::OutlierCapping { multiplier: 1.5 });
    let dictionaries = Dictionaries::new().with_dictionary(
        "countries",
        [
            ("Mexico".to_string(), vec!["mx".to_string()]),
            ("United States".to_string(), vec!["usa".to_string(), "us".to_string()]),
        ]
        .into_iter()
        .collect(),
    );
    (rules, dictionaries)
}

fn bench_workers(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_workers");
    let table = generate_table(100_000);
    let (rules, dictionaries) = rules();
    group.throughput(Throughput::Elements(table.row_count() as u64));

    for workers in [1, 2, 4, 8] {
        let pipeline = Pipeline::new(
            PipelineOptions::default()
                .with_workers(workers)
                .with_identity_column("id"),
        )
        .expect("pipeline");
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, _| {
            b.iter(|| pipeline.run(black_box(&table), &rules, &dictionaries).expect("run"))
        });
    }

    group.finish();
}

fn bench_duplicate_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("duplicate_detection");
    let table = generate_table(100_000);
    let dictionaries = Dictionaries::new();
    let rules = RuleConfig::new();

    for (name, mode) in [
        ("exact", DuplicateDetection::Exact),
        ("fingerprint", DuplicateDetection::Fingerprint),
    ] {
        let pipeline = Pipeline::new(
            PipelineOptions::default()
                .with_workers(4)
                .with_identity_column("id")
                .with_duplicates(mode),
        )
        .expect("pipeline");
        group.bench_function(name, |b| {
            b.iter(|| pipeline.run(black_box(&table), &rules, &dictionaries).expect("run"))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_workers, bench_duplicate_detection);
criterion_main!(benches);
