//! Local Worker Demo - one worker draining an in-memory store
//!
//! Run with: `cargo run --example local_worker`
//!
//! Seeds a store with a handful of trials whose methods exercise every
//! outcome (success, routine error, timeout), runs a worker over them and
//! prints what the store received.

use std::sync::Arc;
use std::time::Duration;

use trueno_trials::config::WorkerConfig;
use trueno_trials::deadline::Budget;
use trueno_trials::store::MemoryTrialStore;
use trueno_trials::trial::TaskDescriptor;
use trueno_trials::worker::TrialWorker;

const ROUTINE: &str = r#"
# Scores a method on a task; "broken" fails and "stuck" never finishes.
fn evaluate(trial) {
    log("evaluating " + trial.method + " on " + trial.task.name);
    if trial.method == "broken" {
        fail("model did not converge on " + trial.task.name);
    }
    while trial.method == "stuck" {
        sleep(0.05);
    }
    let cells = trial.task.n_samples * trial.task.n_features;
    return {method: trial.method, cells: cells};
}
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Trueno-Trials Local Worker Demo ===\n");

    let store = Arc::new(MemoryTrialStore::new());
    store.register_routine("demo", ROUTINE);
    let iris = TaskDescriptor::new("openml", "iris").with_shape(150, 4, 3);
    let adult = TaskDescriptor::new("openml", "adult").with_shape(48_842, 14, 2);
    for (task, method) in [
        (&iris, "ebm"),
        (&adult, "broken"),
        (&iris, "stuck"),
        (&adult, "xgb"),
    ] {
        let id = store.add_trial("demo", task.clone(), method);
        println!("   queued trial {id}: {method} on {}", task.name());
    }

    let config = WorkerConfig::builder("demo", "local-0")
        .budget(Budget::limited(Duration::from_millis(500))?)
        .verbose(true)
        .build()?;
    let summary = TrialWorker::new(store.clone(), config).run().await?;

    println!(
        "\n   ran {} trials: {} succeeded, {} failed\n",
        summary.trials_run, summary.succeeded, summary.failed
    );
    for (id, message) in store.reports() {
        match message {
            None => println!("   trial {id}: ok"),
            Some(message) => {
                let headline = message.lines().next().unwrap_or_default();
                println!("   trial {id}: {headline}");
            }
        }
    }

    Ok(())
}
