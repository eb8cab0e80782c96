use anyhow::{Context, Result, bail};
use ragbench_core::config::Config;
use ragbench_state::test_cases::{self, NewTestCase};
use std::path::Path;
use tracing::info;

pub fn add(
    config: &Config,
    question: &str,
    expected: &[i64],
    min_required_matches: u32,
    category: &str,
) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }
    let store = super::open_store(config)?;
    let case = test_cases::insert_test_case(
        store.conn(),
        &NewTestCase {
            question: question.trim().to_string(),
            expected_document_ids: expected.to_vec(),
            min_required_matches,
            category: category.to_string(),
            is_active: true,
            ..NewTestCase::default()
        },
    )?;
    println!("Added test case {}", case.id);
    Ok(())
}

/// Import a JSON array of test cases. Every entry is validated before any row
/// is written.
pub fn import(config: &Config, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let cases = parse_cases(&raw).with_context(|| format!("Invalid test cases in {}", path.display()))?;

    let store = super::open_store(config)?;
    let mut ids = Vec::with_capacity(cases.len());
    for case in &cases {
        ids.push(test_cases::insert_test_case(store.conn(), case)?.id);
    }
    info!(path = %path.display(), imported = ids.len(), "test cases imported");
    println!("Imported {} test case(s)", ids.len());
    Ok(())
}

fn parse_cases(raw: &str) -> Result<Vec<NewTestCase>> {
    let cases: Vec<NewTestCase> = serde_json::from_str(raw)?;
    for (idx, case) in cases.iter().enumerate() {
        if case.question.trim().is_empty() {
            bail!("entry {idx}: question must not be empty");
        }
    }
    Ok(cases)
}

pub fn list(config: &Config, include_inactive: bool) -> Result<()> {
    let store = super::open_store(config)?;
    let cases = if include_inactive {
        test_cases::list_test_cases(store.conn())?
    } else {
        test_cases::list_active_test_cases(store.conn())?
    };
    super::print_json(&cases)
}

pub fn set_active(config: &Config, id: i64, active: bool) -> Result<()> {
    let store = super::open_store(config)?;
    test_cases::set_active(store.conn(), id, active)?;
    println!(
        "Test case {id} is now {}",
        if active { "active" } else { "inactive" }
    );
    Ok(())
}
