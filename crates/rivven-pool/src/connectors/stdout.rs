//! Stdout sink
//!
//! Writes every record as one line on stdout, for debugging and for the
//! `rivven-pool run` command.

use crate::error::{SinkError, SinkResult};
use crate::sink::{Batch, Sink};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;
use validator::Validate;

/// Stdout sink configuration (the pool's `sink` parameters)
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct StdoutSinkConfig {
    /// Output format
    #[serde(default)]
    pub format: OutputFormat,

    /// Prefix text lines / add a field to JSON lines
    #[serde(default = "default_true")]
    pub include_timestamp: bool,

    /// Rate limit output (records per second, 0 = unlimited)
    #[serde(default)]
    #[validate(range(max = 100000))]
    pub rate_limit: u32,
}

fn default_true() -> bool {
    true
}

impl Default for StdoutSinkConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            include_timestamp: true,
            rate_limit: 0,
        }
    }
}

/// Output format for the stdout sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Record bytes as (lossy) UTF-8
    #[default]
    Text,
    /// One JSON object per record
    Json,
}

/// Stdout Sink implementation
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for StdoutSink {
    type Handle = StdoutSinkConfig;

    fn name(&self) -> &str {
        "stdout"
    }

    async fn connect(&self, params: &serde_yaml::Value) -> SinkResult<StdoutSinkConfig> {
        // An empty parameter block means all defaults
        let config: StdoutSinkConfig = if params.is_null() {
            StdoutSinkConfig::default()
        } else {
            serde_yaml::from_value(params.clone())
                .map_err(|e| SinkError::config(format!("Invalid stdout config: {}", e)))?
        };
        config
            .validate()
            .map_err(|e| SinkError::config(format!("Invalid stdout config: {}", e)))?;
        Ok(config)
    }

    async fn send(&self, config: &StdoutSinkConfig, batch: Batch) -> SinkResult<()> {
        let interval = (config.rate_limit > 0)
            .then(|| Duration::from_secs_f64(1.0 / config.rate_limit as f64));

        if let Some(interval) = interval {
            for record in batch.records() {
                write_lines(std::slice::from_ref(record), config)?;
                tokio::time::sleep(interval).await;
            }
            return Ok(());
        }

        write_lines(batch.records(), config)
    }
}

fn write_lines(records: &[Bytes], config: &StdoutSinkConfig) -> SinkResult<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for record in records {
        writeln!(out, "{}", format_record(record, config))?;
    }
    out.flush()?;
    Ok(())
}

/// Format a record for output
pub fn format_record(record: &[u8], config: &StdoutSinkConfig) -> String {
    let text = String::from_utf8_lossy(record);

    match config.format {
        OutputFormat::Text => {
            if config.include_timestamp {
                format!("[{}] {}", Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"), text)
            } else {
                text.into_owned()
            }
        }
        OutputFormat::Json => {
            // Records that already are JSON are embedded as values
            let data = serde_json::from_slice::<serde_json::Value>(record)
                .unwrap_or_else(|_| serde_json::Value::String(text.into_owned()));

            let mut line = serde_json::json!({
                "size": record.len(),
                "data": data,
            });
            if config.include_timestamp {
                line["timestamp"] = serde_json::Value::String(Utc::now().to_rfc3339());
            }
            line.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: StdoutSinkConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.format, OutputFormat::Text);
        assert!(config.include_timestamp);
        assert_eq!(config.rate_limit, 0);
    }

    #[test]
    fn test_format_text() {
        let config = StdoutSinkConfig {
            include_timestamp: false,
            ..Default::default()
        };
        assert_eq!(format_record(b"hello", &config), "hello");

        let config = StdoutSinkConfig::default();
        let line = format_record(b"hello", &config);
        assert!(line.starts_with('['));
        assert!(line.ends_with("] hello"));
    }

    #[test]
    fn test_format_json() {
        let config = StdoutSinkConfig {
            format: OutputFormat::Json,
            include_timestamp: false,
            ..Default::default()
        };

        let line = format_record(br#"{"id":1}"#, &config);
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["data"]["id"], 1);
        assert_eq!(parsed["size"], 8);
        assert!(parsed.get("timestamp").is_none());

        let line = format_record(b"plain", &config);
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["data"], "plain");
    }

    #[tokio::test]
    async fn test_connect_parses_params() {
        let sink = StdoutSink::new();

        let params: serde_yaml::Value = serde_yaml::from_str("format: json").unwrap();
        let config = sink.connect(&params).await.unwrap();
        assert_eq!(config.format, OutputFormat::Json);

        assert!(sink.connect(&serde_yaml::Value::Null).await.is_ok());

        let bad: serde_yaml::Value = serde_yaml::from_str("format: xml").unwrap();
        let err = sink.connect(&bad).await.unwrap_err();
        assert!(matches!(err, SinkError::Config(_)));

        let too_fast: serde_yaml::Value = serde_yaml::from_str("rate_limit: 1000000").unwrap();
        assert!(sink.connect(&too_fast).await.is_err());
    }
}
