use std::path::Path;

use corral_files::working_directory;

/// Check the config and every definition, reporting each problem.
pub fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let definitions = super::load_fleet_definitions(&config)?;

    println!(
        "config ok: console cache {} lines, definitions at {}",
        config.console_cache_size,
        config.definitions_path.display()
    );

    let mut failures = 0usize;
    for (name, definition) in &definitions.servers {
        let result = definition
            .validate()
            .and_then(|()| working_directory(&definition.working_directory).map(|_| ()));
        match result {
            Ok(()) => println!("  ok     {name}"),
            Err(e) => {
                failures += 1;
                println!("  error  {name}: {e}");
            }
        }
    }

    if failures > 0 {
        anyhow::bail!(
            "{failures} of {} server definitions are invalid",
            definitions.servers.len()
        );
    }
    println!("{} server definitions are valid", definitions.servers.len());
    Ok(())
}
