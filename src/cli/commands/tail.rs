use std::time::Duration;

use anyhow::Result;

use super::{open_store, proxy_stack};
use crate::cli::TailArgs;
use crate::tail::TailSubscription;

pub async fn execute_tail(registry: Option<&std::path::Path>, args: TailArgs) -> Result<()> {
    let (resolver, client) = proxy_stack(open_store(registry)?)?;
    let subscription = TailSubscription::new(resolver, client, vec![args.worker.clone()]);

    eprintln!("Tailing '{}'. Press Ctrl+C to stop.\n", args.worker);

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval.max(10)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                match subscription.drain(&args.worker).await {
                    Ok(events) => {
                        for event in events {
                            println!("{}", serde_json::to_string(&event)?);
                        }
                    }
                    // the producer may be restarting; keep polling
                    Err(e) => eprintln!("Tail error: {}", e),
                }
            }
        }
    }

    Ok(())
}
