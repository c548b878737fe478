use std::time::Duration;

use anyhow::Result;

use super::open_store;
use crate::cli::ListArgs;
use crate::registry::SessionDescriptor;

pub async fn execute_list(registry: Option<&std::path::Path>, args: ListArgs) -> Result<()> {
    let mut store = open_store(registry)?;
    if let Some(secs) = args.stale_after {
        store = store.with_stale_after(Duration::from_secs(secs));
    }

    let sessions = store.list().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        eprintln!("No sessions registered in {}", store.path().display());
        return Ok(());
    }

    for descriptor in sessions.values() {
        println!("{}", summary_line(descriptor));
    }
    Ok(())
}

fn summary_line(descriptor: &SessionDescriptor) -> String {
    let mut line = format!(
        "{}\t{}\t{}",
        descriptor.worker_name,
        descriptor.mode,
        descriptor.base_url(&descriptor.default_address())
    );

    match &descriptor.entrypoint_addresses {
        Some(entrypoints) => {
            let named: Vec<&str> = entrypoints
                .keys()
                .map(String::as_str)
                .filter(|name| *name != crate::registry::DEFAULT_ENTRYPOINT)
                .collect();
            if !named.is_empty() {
                line.push_str(&format!("\tentrypoints: {}", named.join(", ")));
            }
        }
        None => line.push_str("\t(legacy)"),
    }

    if !descriptor.durable_objects.is_empty() {
        let classes: Vec<&str> = descriptor
            .durable_objects
            .iter()
            .map(|d| d.class_name.as_str())
            .collect();
        line.push_str(&format!("\tdurable objects: {}", classes.join(", ")));
    }
    line
}
