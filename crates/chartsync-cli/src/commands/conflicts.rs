use chartsync_core::util::normalize_text_option;
use chartsync_core::Resolution;

use crate::cli::KeepSide;
use crate::commands::common::{
    conflict_to_list_item, format_conflict_lines, ConflictListItem, StoreTarget,
};
use crate::error::CliError;

pub fn run_conflicts(resolved: bool, as_json: bool, target: &StoreTarget) -> Result<(), CliError> {
    let engine = target.open_engine()?;
    let conflicts = engine.get_conflicts(resolved)?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(conflict_to_list_item)
            .collect::<Vec<ConflictListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!(
            "{}",
            if resolved {
                "No resolved conflicts recorded."
            } else {
                "No open conflicts."
            }
        );
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_resolve(
    conflict_id: &str,
    keep: KeepSide,
    resolved_by: Option<String>,
    target: &StoreTarget,
) -> Result<(), CliError> {
    let engine = target.open_engine()?;
    let conflict_id = conflict_id.trim();
    let open = engine
        .get_conflicts(false)?
        .into_iter()
        .find(|conflict| conflict.id == conflict_id);
    let Some(open) = open else {
        return Err(chartsync_core::Error::NotFound(format!("open conflict {conflict_id}")).into());
    };

    let resolution = match keep {
        KeepSide::Local => Resolution::local_wins(&open.local_resource, "kept local copy"),
        KeepSide::Remote => Resolution::remote_wins(&open.remote_resource, "kept server copy"),
    };
    let resolved_by = normalize_text_option(resolved_by);
    let conflict = engine
        .resolve_conflict(conflict_id, resolution, resolved_by.as_deref())
        .await?;

    println!(
        "Resolved {} for {} by {}",
        conflict.id,
        conflict.key(),
        conflict.resolved_by.as_deref().unwrap_or("-")
    );
    if keep == KeepSide::Local {
        println!("The local copy will be pushed on the next sync.");
    }
    Ok(())
}
