//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager, LOCAL_CONFIG_NAME};
use crate::error::{KilnError, KilnResult};
use crate::ui::{self, UiContext};
use std::path::Path;
use tokio::fs;

/// Keys accepted by `config set`
const VALID_KEYS: &[&str] = &[
    "general.verbose",
    "general.log_format",
    "build.cc",
    "build.cxx",
    "build.flags",
    "build.libraries",
    "build.timeout_secs",
    "build.lock_attempt_ms",
    "build.retry_delay_ms",
    "build.max_retry_delay_ms",
    "build.lock_expiry_secs",
    "build.jobs",
    "fingerprint.env_var",
    "fingerprint.command",
    "fingerprint.length",
    "discover.extensions",
    "discover.marker",
];

/// Keys that store as arrays
const LIST_KEYS: &[&str] = &[
    "build.flags",
    "build.libraries",
    "fingerprint.command",
    "discover.extensions",
];

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> KilnResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value, local }) => {
            validate_config_key(&key)?;
            if local {
                set_local_value(&key, &value).await?
            } else {
                set_value(manager, &key, &value).await?
            }
        }
    }

    Ok(())
}

fn show_config(config: &Config) -> KilnResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> KilnResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;

    ui::step_ok_detail(
        &ctx,
        "Configuration initialized",
        &path.display().to_string(),
    );

    Ok(())
}

/// Set a key in the global config file
///
/// Edits the file's own TOML tree rather than the merged config so local
/// overrides never leak into the global file.
async fn set_value(manager: &ConfigManager, key: &str, value: &str) -> KilnResult<()> {
    let ctx = UiContext::detect();

    let mut doc = read_toml_tree(manager.path()).await?;
    set_toml_value(&mut doc, key, value)?;

    let config = check_schema(&doc, manager.path())?;
    manager.save(&config).await?;

    ui::step_ok(&ctx, &format!("Set {} = {}", key, value));
    Ok(())
}

async fn set_local_value(key: &str, value: &str) -> KilnResult<()> {
    let cwd = std::env::current_dir().map_err(|e| KilnError::io("getting current directory", e))?;
    set_value_in_file(&cwd.join(LOCAL_CONFIG_NAME), key, value).await
}

/// Set a key in a local override file, keeping only keys set explicitly
async fn set_value_in_file(local_path: &Path, key: &str, value: &str) -> KilnResult<()> {
    let ctx = UiContext::detect();

    let mut doc = read_toml_tree(local_path).await?;
    set_toml_value(&mut doc, key, value)?;
    check_schema(&doc, local_path)?;

    let content = toml::to_string_pretty(&doc)?;
    fs::write(local_path, content)
        .await
        .map_err(|e| KilnError::io(format!("writing {}", local_path.display()), e))?;

    ui::step_ok(
        &ctx,
        &format!("Set {} = {} in {}", key, value, local_path.display()),
    );

    Ok(())
}

/// Reject a tree that would not load as a [`Config`]
fn check_schema(doc: &toml::Value, path: &Path) -> KilnResult<Config> {
    doc.clone()
        .try_into()
        .map_err(|e: toml::de::Error| KilnError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Load a TOML file as a raw tree, or an empty table if it doesn't exist
async fn read_toml_tree(path: &Path) -> KilnResult<toml::Value> {
    if !path.exists() {
        return Ok(toml::Value::Table(toml::map::Map::new()));
    }
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| KilnError::io(format!("reading {}", path.display()), e))?;
    content
        .parse()
        .map_err(|e: toml::de::Error| KilnError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Validate that a config key is one we recognise.
fn validate_config_key(key: &str) -> KilnResult<()> {
    if VALID_KEYS.contains(&key) {
        Ok(())
    } else {
        Err(KilnError::User(format!(
            "Unknown config key: {} (valid keys: {})",
            key,
            VALID_KEYS.join(", ")
        )))
    }
}

/// Set a dot-separated key in a TOML value tree, creating intermediate tables as needed.
fn set_toml_value(doc: &mut toml::Value, key: &str, value: &str) -> KilnResult<()> {
    let (parents, leaf) = match key.rsplit_once('.') {
        Some((parents, leaf)) => (parents.split('.').collect::<Vec<_>>(), leaf),
        None => (Vec::new(), key),
    };
    let mut current = doc;

    for part in parents {
        current = current
            .as_table_mut()
            .ok_or_else(|| KilnError::User(format!("Expected table at key: {}", part)))?
            .entry(part)
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    let table = current
        .as_table_mut()
        .ok_or_else(|| KilnError::User(format!("Expected table for key: {}", key)))?;

    let toml_value = if LIST_KEYS.contains(&key) {
        let items: Vec<toml::Value> = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| toml::Value::String(s.to_string()))
            .collect();
        toml::Value::Array(items)
    } else if let Ok(b) = value.parse::<bool>() {
        toml::Value::Boolean(b)
    } else if let Ok(n) = value.parse::<i64>() {
        toml::Value::Integer(n)
    } else {
        toml::Value::String(value.to_string())
    };

    table.insert(leaf.to_string(), toml_value);
    Ok(())
}
