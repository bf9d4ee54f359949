use std::fs;
use std::io::{self, Read};

use anyhow::{Context, Result};
use colored::Colorize;
use octofhir_sync_memory::MemoryDatabase;
use serde_json::Value;

use crate::output::print_success;

fn parse_reference(reference: &str) -> Result<(&str, &str)> {
    match reference.split_once('/') {
        Some((rt, id)) if !rt.is_empty() && !id.is_empty() && !id.contains('/') => Ok((rt, id)),
        _ => anyhow::bail!("Invalid reference \"{reference}\". Expected format: ResourceType/id"),
    }
}

fn read_body(file: &Option<String>) -> Result<Value> {
    let content = match file {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("Failed to read file: {path}"))?
        }
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            buf
        }
    };
    serde_json::from_str(&content).context("Invalid JSON")
}

fn resource_type(body: &Value) -> &str {
    body.get("resourceType").and_then(Value::as_str).unwrap_or("?")
}

pub async fn insert(db: &MemoryDatabase, file: &Option<String>) -> Result<()> {
    let body = read_body(file)?;
    let rt = resource_type(&body).to_string();
    let id = db.insert(body).await?;
    db.save().await?;
    print_success(&format!("Recorded creation of {}/{}", rt.cyan(), id.cyan()));
    Ok(())
}

pub async fn update(db: &MemoryDatabase, file: &Option<String>) -> Result<()> {
    let body = read_body(file)?;
    let rt = resource_type(&body).to_string();
    let id = body.get("id").and_then(Value::as_str).unwrap_or("?").to_string();
    match db.update(body).await? {
        Some(_) => {
            db.save().await?;
            print_success(&format!("Recorded update of {}/{}", rt.cyan(), id.cyan()));
        }
        None => println!("{}/{} is unchanged; nothing recorded", rt, id),
    }
    Ok(())
}

pub async fn delete(db: &MemoryDatabase, reference: &str) -> Result<()> {
    let (rt, id) = parse_reference(reference)?;
    db.delete(rt, id).await?;
    db.save().await?;
    print_success(&format!("Recorded deletion of {}/{}", rt.cyan(), id.cyan()));
    Ok(())
}
