//! Run a small prompt batch end to end against the Gemini API.
//!
//! Needs `GEMINI_API_KEY` in the environment:
//!
//! ```sh
//! GEMINI_API_KEY=... cargo run --example run_batch
//! ```

use std::sync::Arc;
use std::time::Duration;

use promptbench_sched::cost::format_usd;
use promptbench_sched::job::{BatchJob, WorkItem};
use promptbench_sched::persistence::{SqliteStore, StateStore};
use promptbench_sched::registry::JobRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let store = Arc::new(SqliteStore::new("promptbench.db")?);

    let job = BatchJob::new("gemini-1.5-flash");
    let prompts = [
        "Give a one-sentence summary of the Rust borrow checker.",
        "Name three uses of SQLite outside of mobile apps.",
        "What does exponential backoff protect against?",
    ];
    let rows: Vec<_> = prompts
        .iter()
        .enumerate()
        .map(|(i, p)| WorkItem::new(job.id.clone(), i as u32, *p))
        .collect();
    store.save_job(&job).await?;
    store.insert_work_items(&rows).await?;

    let registry = JobRegistry::new(Arc::clone(&store) as Arc<dyn StateStore>);
    let outcome = registry.schedule(&job.id, None).await?;
    if !outcome.scheduled {
        eprintln!("not scheduled: {:?}", outcome.reason);
        return Ok(());
    }

    // Poll until the detached run loop finishes.
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let current = store
            .load_job(&job.id)
            .await?
            .expect("job vanished from the store");
        if current.run_state.is_terminal() {
            println!(
                "job {} finished as {}: {} completed, {} failed, {} retried",
                current.id,
                current.run_state,
                current.completed_rows,
                current.failed_rows,
                current.retried_rows,
            );
            if let Some(savings) = current.estimated_savings_usd {
                println!("estimated batch savings: {}", format_usd(savings));
            }
            break;
        }
    }

    for item in store.list_work_items(&job.id).await? {
        println!(
            "[{}] {} -> {}",
            item.row_index,
            item.status,
            item.output.as_deref().unwrap_or(item.error.as_deref().unwrap_or("-")),
        );
    }
    Ok(())
}
