use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bidi_matcher::{check, sort_messages, Mode, Pattern};
use clap::Args;
use serde_json::Value;
use tokio::fs;

#[derive(Args, Clone, Debug)]
pub struct MatchArgs {
    /// Expected JSON; may contain `$any`, `$range`, `$extending` and `$exact` markers
    pub expected: PathBuf,

    /// Actual JSON, e.g. a captured response or event list
    pub actual: PathBuf,

    /// Let objects in `expected` omit keys present in `actual`
    #[arg(short, long)]
    pub extending: bool,

    /// Sort top-level arrays by these dotted keys before comparing, repeatable
    #[arg(long = "sort-by", value_name = "KEY")]
    pub sort_by: Vec<String>,
}

async fn read_json(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Compares `actual` against the template `expected`; `Err` carries the mismatch.
pub fn compare(
    mut expected: Value,
    mut actual: Value,
    extending: bool,
    sort_by: &[String],
) -> Result<()> {
    if !sort_by.is_empty() {
        let keys: Vec<&str> = sort_by.iter().map(String::as_str).collect();
        for value in [&mut expected, &mut actual] {
            if let Value::Array(items) = value {
                sort_messages(items, &keys);
            }
        }
    }

    let mode = if extending {
        Mode::Extending
    } else {
        Mode::Exact
    };
    let pattern = Pattern::from_template(expected, mode).context("invalid expected template")?;
    if let Err(mismatch) = check(&pattern, &actual) {
        bail!("mismatch {mismatch}");
    }
    Ok(())
}

pub async fn cmd_match(args: MatchArgs) -> Result<()> {
    let expected = read_json(&args.expected).await?;
    let actual = read_json(&args.actual).await?;
    compare(expected, actual, args.extending, &args.sort_by)?;
    println!("match");
    Ok(())
}
