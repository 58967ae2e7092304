use std::path::Path;

pub fn show() {
    println!("{}", colony_config::AppConfig::default_toml());
}

pub fn validate(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(path)?;
    println!("✅ Configuration is valid");
    println!("   Data dir:      {}", config.data_dir().display());
    println!("   Workers:       {}", config.workers.len());
    println!("   Max workers:   {}", config.runtime.max_workers);
    println!("   Memory:        {} dims, persist={}", config.memory.embedding_dimensions, config.memory.persist);
    println!("   Event log:     capacity {}, persist={}", config.event_log.capacity, config.event_log.persist);
    println!(
        "   Gate:          default {}, {} allow / {} deny rules",
        if config.gate.default_allow { "allow" } else { "deny" },
        config.gate.allow.len(),
        config.gate.deny.len()
    );
    Ok(())
}
