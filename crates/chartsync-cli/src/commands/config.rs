use crate::commands::common::StoreTarget;
use crate::error::CliError;

pub fn run_config(target: &StoreTarget) -> Result<(), CliError> {
    let config = target.load_config()?;
    config.validate()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
