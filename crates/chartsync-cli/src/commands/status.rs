use crate::commands::common::{format_status_lines, StoreTarget};
use crate::error::CliError;

pub fn run_status(as_json: bool, target: &StoreTarget) -> Result<(), CliError> {
    let engine = target.open_engine()?;
    let status = engine.refresh_status()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Store:       {}", target.db_path.display());
    for line in format_status_lines(&status) {
        println!("{line}");
    }
    Ok(())
}
