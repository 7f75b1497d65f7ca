use std::path::Path;

use chartsync_core::SyncDataExport;
use chrono::Utc;

use crate::commands::common::{export_destination, StoreTarget};
use crate::error::CliError;

pub fn run_export(output_path: Option<&Path>, target: &StoreTarget) -> Result<(), CliError> {
    let engine = target.open_engine()?;
    let export = engine.export_sync_data()?;
    let rendered = export.to_json_pretty()?;

    if let Some(path) = output_path {
        let path = export_destination(path, Utc::now().timestamp_millis());
        std::fs::write(&path, rendered)?;
        println!("{}", path.display());
    } else {
        println!("{rendered}");
    }

    Ok(())
}

pub fn run_import(input_path: &Path, target: &StoreTarget) -> Result<(), CliError> {
    let payload = std::fs::read_to_string(input_path)?;
    let export = SyncDataExport::from_json(&payload)?;
    let engine = target.open_engine()?;
    engine.import_sync_data(&export)?;
    println!(
        "Imported {} queued changes, {} conflicts and {} resources",
        export.queue.len(),
        export.conflicts.len(),
        export.resources.len()
    );
    Ok(())
}
