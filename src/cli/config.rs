use crate::config::generate::generate_starter_config;
use crate::config::{load_config, ConfigError};
use std::fs;
use std::path::{Path, PathBuf};

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();
    write_config(&config_content, stdout)
}

fn write_config(config_content: &str, stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    // Try ~/.config/logship/config.yml first
    let config_path = dirs::home_dir().and_then(|home_dir| {
        let user_config = home_dir.join(".config/logship/config.yml");
        let parent = user_config.parent()?;
        match fs::create_dir_all(parent) {
            Ok(_) => Some(user_config),
            Err(_) => {
                eprintln!("Warning: Could not create directory {}", parent.display());
                eprintln!("Falling back to /etc/logship/config.yml");
                None
            }
        }
    });

    let config_path = config_path.unwrap_or_else(|| PathBuf::from("/etc/logship/config.yml"));

    if config_path.exists() {
        eprintln!(
            "Error: Config file already exists at {}",
            config_path.display()
        );
        eprintln!("Remove it first or use --stdout to print the config");
        std::process::exit(1);
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(&config_path, config_content)?;

    println!("Config file written to {}", config_path.display());
    Ok(())
}

/// Human-readable list of problems with the config at `path`; empty when valid.
pub fn check_problems(path: &Path) -> Vec<String> {
    match load_config(path) {
        Ok(_) => Vec::new(),
        Err(ConfigError::ValidationList(errors)) => errors,
        Err(other) => vec![other.to_string()],
    }
}

pub fn check(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.ok_or("No config file found. Use --config to specify a path.")?;

    println!("Validating config file: {}", path.display());

    let problems = check_problems(&path);
    if problems.is_empty() {
        println!("✓ Config is valid");
        return Ok(());
    }

    eprintln!("✗ Config validation failed:");
    for problem in &problems {
        eprintln!("  - {}", problem);
    }
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file(yaml: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_check_valid_file() {
        let file = file("queue:\n  capacity: 10\n");
        assert!(check_problems(file.path()).is_empty());
    }

    #[test]
    fn test_check_lists_every_problem() {
        let file = file("queue:\n  capacity: 0\nworkers:\n  count: 0\n");
        let problems = check_problems(file.path());
        assert_eq!(problems.len(), 2);
        assert!(problems.iter().any(|p| p.contains("queue.capacity")));
        assert!(problems.iter().any(|p| p.contains("workers.count")));
    }

    #[test]
    fn test_check_reports_unknown_keys() {
        let file = file("queue:\n  capacty: 10\n");
        let problems = check_problems(file.path());
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("capacty"));
    }
}
