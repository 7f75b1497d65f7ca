use crate::commands::common::{
    format_queue_lines, queue_item_to_list_item, QueueListItem, StoreTarget,
};
use crate::error::CliError;

pub fn run_queue(failed: bool, as_json: bool, target: &StoreTarget) -> Result<(), CliError> {
    let engine = target.open_engine()?;
    let items = if failed {
        engine.failed_operations()?
    } else {
        engine.pending_operations()?
    };

    if as_json {
        let json_items = items
            .iter()
            .map(queue_item_to_list_item)
            .collect::<Vec<QueueListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!(
            "{}",
            if failed {
                "No failed changes."
            } else {
                "No queued changes."
            }
        );
        return Ok(());
    }

    for line in format_queue_lines(&items) {
        println!("{line}");
    }
    Ok(())
}

pub fn run_retry(item_id: &str, target: &StoreTarget) -> Result<(), CliError> {
    let engine = target.open_engine()?;
    let item = engine.retry_failed(item_id.trim())?;
    println!("Requeued {} ({} {})", item.id, item.operation, item.key());
    Ok(())
}

pub fn run_discard(item_id: &str, target: &StoreTarget) -> Result<(), CliError> {
    let engine = target.open_engine()?;
    let item = engine.discard_failed(item_id.trim())?;
    println!("Discarded {} ({} {})", item.id, item.operation, item.key());
    Ok(())
}
