use std::path::Path;

/// Print the defined servers, as a table or as JSON.
pub fn run(config_path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let definitions = super::load_fleet_definitions(&config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&definitions.servers)?);
        return Ok(());
    }

    if definitions.servers.is_empty() {
        println!("No servers defined in {}", config.definitions_path.display());
        return Ok(());
    }

    println!("{:<20} {:<40} COMMAND", "NAME", "WORKING DIRECTORY");
    for (name, definition) in &definitions.servers {
        println!(
            "{:<20} {:<40} {}",
            name, definition.working_directory, definition.command
        );
    }
    Ok(())
}
