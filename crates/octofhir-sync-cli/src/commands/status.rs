use anyhow::Result;
use colored::Colorize;
use octofhir_sync_core::Database;
use octofhir_sync_memory::MemoryDatabase;

use crate::output::print_changes;

pub async fn status(db: &MemoryDatabase) -> Result<()> {
    let changes = db.get_all_local_changes().await?;
    let resources = db.pending_resource_count().await?;

    if let Some(path) = db.path() {
        println!("{}: {}", "Store".cyan(), path.display());
    }
    print_changes(&changes);
    println!(
        "{}: {} change(s) across {} resource(s)",
        "Pending".cyan(),
        changes.len(),
        resources
    );
    Ok(())
}
