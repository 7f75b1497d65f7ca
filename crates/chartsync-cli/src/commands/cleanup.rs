use crate::commands::common::StoreTarget;
use crate::error::CliError;

pub fn run_cleanup(days_to_keep: u32, target: &StoreTarget) -> Result<(), CliError> {
    let engine = target.open_engine()?;
    let report = engine.cleanup(days_to_keep)?;
    println!(
        "Removed {} resolved conflicts and {} error records older than {days_to_keep} days",
        report.conflicts_removed, report.errors_removed
    );
    Ok(())
}

pub fn run_clear(confirmed: bool, target: &StoreTarget) -> Result<(), CliError> {
    if !confirmed {
        return Err(CliError::ConfirmationRequired);
    }
    let engine = target.open_engine()?;
    engine.clear_local_data()?;
    println!("Cleared local sync data in {}", target.db_path.display());
    Ok(())
}
