use colored::Colorize;
use octofhir_sync::SyncUploadEvent;
use octofhir_sync_core::LocalChange;
use tabled::builder::Builder;
use tabled::settings::Style;
use time::format_description::well_known::Rfc3339;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_changes(changes: &[LocalChange]) {
    if changes.is_empty() {
        println!("No pending changes.");
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(["ID", "Change", "Resource", "Base version", "Recorded"]);
    for change in changes {
        let recorded = change
            .timestamp
            .format(&Rfc3339)
            .unwrap_or_else(|_| "-".to_string());
        builder.push_record([
            change.token.to_string(),
            change.change_type.to_string(),
            change.reference(),
            change.base_version().unwrap_or("-").to_string(),
            recorded,
        ]);
    }
    let table = builder.build().with(Style::rounded()).to_string();
    println!("{table}");
}

pub fn print_event(event: &SyncUploadEvent) {
    match event {
        SyncUploadEvent::Started { total } => {
            println!("{} {} resource(s) to upload", "→".cyan(), total);
        }
        SyncUploadEvent::Progress(progress) => {
            println!(
                "{} {}/{} uploaded",
                "✓".green(),
                progress.completed,
                progress.total
            );
        }
        SyncUploadEvent::Failure { error, tokens } => {
            let ids: Vec<String> = tokens.iter().map(ToString::to_string).collect();
            print_error(&format!("{error}"));
            eprintln!("  pending entries: {}", ids.join(" "));
            if error.is_retryable() {
                eprintln!("  {}", "retrying later may succeed".yellow());
            }
        }
        SyncUploadEvent::Completed => print_success("Upload complete"),
    }
}
