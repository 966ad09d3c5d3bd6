//! `quill doctor` — Diagnose configuration and backend health.

use quill_config::AppConfig;
use quill_core::agent::Credentials;
use quill_providers::BackendSet;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("Quill Doctor — System Diagnostics");
    println!("=================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("  ⚠️  No config file at {} (using defaults)", config_path.display());
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            println!("\n  1 issue found. Fix the config before running other checks.");
            return Ok(());
        }
    };

    println!("  ✅ Default model: {}", config.default_model);
    println!("  ✅ Fallback model: {}", config.fallback_model);
    println!("  ✅ Memory backend: {}", config.memory.backend);

    let backends = BackendSet::from_config(&config);
    let probes = [
        ("Native backend", config.gemini.api_key.is_some(), config.fallback_model.clone()),
        ("Alternate backend", config.openai.api_key.is_some(), "gpt-4o-mini".to_string()),
    ];

    for (label, has_key, probe_model) in probes {
        if !has_key {
            println!("  ⚠️  {label}: no API key configured");
            issues += 1;
            continue;
        }
        let selection = backends.select(&probe_model, &Credentials::default(), None);
        match selection.provider.health_check().await {
            Ok(true) => println!("  ✅ {label}: reachable"),
            Ok(false) => {
                println!("  ❌ {label}: responded with an error");
                issues += 1;
            }
            Err(e) => {
                println!("  ❌ {label}: {}", e.user_message());
                issues += 1;
            }
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
