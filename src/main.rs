use std::env;

use rewards_eng::csv::{read_operations, write_balances};
use rewards_eng::store::{MemoryStore, TransactionStore};
use rewards_eng::{CommissionPolicy, Engine};
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let path = env::args()
        .nth(1)
        .expect("usage: rewards-eng <operations.csv>");

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    // Referral rate in percent; defaults to 10.
    let policy = match env::var("COMMISSION_RATE") {
        Ok(raw) => CommissionPolicy::from_percent(
            raw.parse().expect("COMMISSION_RATE must be a number"),
        ),
        Err(_) => CommissionPolicy::default(),
    };

    let engine = Engine::with_policy(MemoryStore::new(), policy);
    let (op_sender, op_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in read_operations(&path) {
            match result {
                Ok(op) => {
                    op_sender.send(op).await.unwrap();
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    engine.run(ReceiverStream::new(op_receiver)).await;

    let mut users = engine.store().users().expect("failed to list users");
    users.sort_by_key(|user| user.id);
    write_balances(users.into_iter().map(|user| {
        let breakdown = engine
            .available_balance(user.id)
            .expect("failed to derive balance");
        (user.id, breakdown)
    }));
}
