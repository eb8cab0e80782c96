use anyhow::{Context, Result, bail};
use ragbench_core::config::Config;
use ragbench_core::types::{AlgorithmVersion, VersionParameters};
use ragbench_eval::strategy::Strategy;
use ragbench_state::versions::{self, NewVersion};
use ragbench_state::store::SqliteStore;

pub struct AddArgs {
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub params: Option<String>,
    pub baseline: bool,
    pub created_by: Option<String>,
}

pub fn add(config: &Config, args: AddArgs) -> Result<()> {
    let code = args.code.trim();
    if code.is_empty() {
        bail!("version code must not be empty");
    }
    let parameters = match args.params.as_deref() {
        Some(raw) => parse_params(raw)?,
        None => VersionParameters::new(),
    };

    let mut store = super::open_store(config)?;
    let version = versions::create_version(
        store.conn_mut(),
        &NewVersion {
            version_name: args.name.trim().to_string(),
            version_code: code.to_string(),
            description: args.description,
            parameters,
            is_baseline: args.baseline,
            created_by: args.created_by,
        },
    )?;
    warn_on_unresolvable_strategy(config, &version);

    println!(
        "Added version {} ({}){}",
        version.id,
        version.version_code,
        if version.is_baseline { " [baseline]" } else { "" }
    );
    Ok(())
}

pub fn list(config: &Config) -> Result<()> {
    let store = super::open_store(config)?;
    super::print_json(&versions::list_versions(store.conn())?)
}

/// Accepts a numeric id or a version code.
pub fn show(config: &Config, version: &str) -> Result<()> {
    let store = super::open_store(config)?;
    let found = lookup(&store, version)?;
    let Some(found) = found else {
        bail!("algorithm version not found: {version}");
    };
    super::print_json(&found)
}

pub fn set_baseline(config: &Config, id: i64) -> Result<()> {
    let mut store = super::open_store(config)?;
    versions::set_baseline(store.conn_mut(), id)?;
    println!("Version {id} is now the baseline");
    Ok(())
}

pub fn set_params(config: &Config, id: i64, raw: &str) -> Result<()> {
    let parameters = parse_params(raw)?;
    let store = super::open_store(config)?;
    versions::update_parameters(store.conn(), id, &parameters)?;
    if let Some(version) = versions::get_version(store.conn(), id)? {
        warn_on_unresolvable_strategy(config, &version);
    }
    println!("Updated parameters for version {id}");
    Ok(())
}

fn lookup(store: &SqliteStore, version: &str) -> Result<Option<AlgorithmVersion>> {
    let conn = store.conn();
    let version = version.trim();
    if let Ok(id) = version.parse::<i64>()
        && let Some(found) = versions::get_version(conn, id)?
    {
        return Ok(Some(found));
    }
    Ok(versions::get_version_by_code(conn, version)?)
}

fn parse_params(raw: &str) -> Result<VersionParameters> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("--params must be valid JSON")?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("--params must be a JSON object"),
    }
}

/// Surface a bad strategy key at registration time instead of at run time.
fn warn_on_unresolvable_strategy(config: &Config, version: &AlgorithmVersion) {
    if let Err(err) = Strategy::resolve(version, config.runner.unknown_strategy_typed()) {
        eprintln!("warning: {err}; runs of this version will be skipped");
    }
}
