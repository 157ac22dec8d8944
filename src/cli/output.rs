use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

pub fn render<T: Serialize>(value: &T, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    })
}

pub fn print<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    let text = render(value, format)?;
    println!("{}", text.trim_end());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_both_formats() {
        let value = json!({ "ready": true });
        assert_eq!(
            render(&value, OutputFormat::Json).unwrap(),
            "{\n  \"ready\": true\n}"
        );
        assert_eq!(render(&value, OutputFormat::Yaml).unwrap(), "ready: true\n");
    }
}
