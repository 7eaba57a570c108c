//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands};
use crate::config::{seconds, DispatcherConfig, PolicyKind, StoreConfig};
use crate::error::{Error, Result};
use crate::http::{Dispatcher, RequestConfig};
use crate::limiter::{describe_rules, Limiter, RateLimiter};
use crate::types::Method;
use futures::TryStreamExt;
use std::io::Write;

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        let config = self.load_config()?;

        match &self.cli.command {
            Commands::Send {
                url,
                method,
                headers,
                data,
                json,
                timeout,
                stream,
                no_redirects,
                include,
            } => {
                let request = build_request_config(
                    headers,
                    data.as_deref(),
                    json.as_deref(),
                    *timeout,
                    *stream,
                    *no_redirects,
                )?;
                self.send(&config, *method, url, request, *include).await
            }
            Commands::Rules => self.rules(&config),
        }
    }

    /// Load the config file, if any, and apply command-line overrides
    fn load_config(&self) -> Result<DispatcherConfig> {
        let mut config = match &self.cli.config {
            Some(path) => DispatcherConfig::from_file(path)?,
            None => DispatcherConfig::default(),
        };

        if let Some(identity) = &self.cli.identity {
            config.identity.clone_from(identity);
        }

        config.validate()?;
        Ok(config)
    }

    async fn send(
        &self,
        config: &DispatcherConfig,
        method: Method,
        url: &str,
        request: RequestConfig,
        include: bool,
    ) -> Result<()> {
        let dispatcher = Dispatcher::from_config(config)?;
        let response = dispatcher.send(method, url, request).await?;

        println!(
            "{} {}",
            response.status().as_u16(),
            response.status().canonical_reason().unwrap_or_default()
        );

        if include || self.cli.verbose {
            for (name, value) in response.headers() {
                println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
            }
            println!();
        }

        let mut stdout = std::io::stdout().lock();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.try_next().await? {
            stdout.write_all(&chunk)?;
        }
        stdout.flush()?;

        Ok(())
    }

    fn rules(&self, config: &DispatcherConfig) -> Result<()> {
        let limiter = RateLimiter::from_config(&config.limiter)?;

        println!("Identity: {}", config.identity);
        println!("Rules:    {}", describe_rules(limiter.rules()));
        match config.limiter.policy {
            PolicyKind::Block => println!("Policy:   block until admitted"),
            PolicyKind::MaxDelay => println!(
                "Policy:   wait at most {}s, then fail",
                config.limiter.max_delay_secs
            ),
        }
        match &config.limiter.store {
            StoreConfig::Memory => println!("Store:    memory"),
            StoreConfig::File { path } => println!("Store:    file ({})", path.display()),
        }
        println!(
            "Retries:  {} (base delay {}s)",
            config.retry.max_retries, config.retry.base_delay_secs
        );

        Ok(())
    }
}

/// Turn `send` arguments into a request config
fn build_request_config(
    headers: &[String],
    data: Option<&str>,
    json: Option<&str>,
    timeout: Option<f64>,
    stream: bool,
    no_redirects: bool,
) -> Result<RequestConfig> {
    let mut request = RequestConfig::new();

    if !headers.is_empty() {
        let pairs = headers
            .iter()
            .map(|h| parse_header(h))
            .collect::<Result<Vec<_>>>()?;
        request = request.headers(pairs);
    }

    if let Some(data) = data {
        request = request.text(data);
    }

    if let Some(json) = json {
        request = request.json(serde_json::from_str(json)?);
    }

    if let Some(secs) = timeout {
        let timeout = seconds("--timeout", secs)?;
        if timeout.is_zero() {
            return Err(Error::config("--timeout must be positive"));
        }
        request = request.timeout(timeout);
    }

    if stream {
        request = request.stream(true);
    }

    if no_redirects {
        request = request.allow_redirects(false);
    }

    Ok(request)
}

/// Parse a `Name: value` header argument
fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| Error::invalid_header(raw, "expected 'Name: value'"))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(Error::invalid_header(raw, "header name is empty"));
    }

    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("User-Agent: FOO").unwrap(),
            ("User-Agent".to_string(), "FOO".to_string())
        );
        assert_eq!(
            parse_header("X-Url:https://a.b/c").unwrap(),
            ("X-Url".to_string(), "https://a.b/c".to_string())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_build_request_config() {
        let request = build_request_config(
            &["BAR: ABD".to_string()],
            None,
            Some(r#"{"a": 1}"#),
            Some(8.0),
            true,
            true,
        )
        .unwrap();

        assert_eq!(
            request.headers,
            Some(vec![("BAR".to_string(), "ABD".to_string())])
        );
        assert!(request.body.is_some());
        assert_eq!(request.timeout, Some(Duration::from_secs(8)));
        assert_eq!(request.stream, Some(true));
        assert_eq!(request.allow_redirects, Some(false));
    }

    #[test]
    fn test_build_request_config_defaults_untouched() {
        let request = build_request_config(&[], None, None, None, false, false).unwrap();
        assert!(request.headers.is_none());
        assert!(request.body.is_none());
        assert!(request.timeout.is_none());
        assert!(request.stream.is_none());
        assert!(request.allow_redirects.is_none());
    }

    #[test]
    fn test_build_request_config_rejects_bad_input() {
        assert!(build_request_config(&[], None, Some("{oops"), None, false, false).is_err());
        assert!(build_request_config(&[], None, None, Some(0.0), false, false).is_err());
        assert!(build_request_config(&[], None, None, Some(1e20), false, false).is_err());
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "pacer",
            "--identity",
            "crawler",
            "send",
            "-X",
            "post",
            "-H",
            "Accept: text/plain",
            "--no-redirects",
            "https://www.example.com",
        ]);

        assert_eq!(cli.identity.as_deref(), Some("crawler"));
        assert_eq!(cli.log_level(), crate::types::LogLevel::Info);
        match cli.command {
            Commands::Send {
                url,
                method,
                headers,
                no_redirects,
                ..
            } => {
                assert_eq!(url, "https://www.example.com");
                assert_eq!(method, Method::POST);
                assert_eq!(headers, vec!["Accept: text/plain".to_string()]);
                assert!(no_redirects);
            }
            Commands::Rules => panic!("expected send"),
        }
    }

    #[test]
    fn test_identity_override() {
        let cli = Cli::parse_from(["pacer", "-i", "override", "rules"]);
        let config = Runner::new(cli).load_config().unwrap();
        assert_eq!(config.identity, "override");
    }

    #[test]
    fn test_rules_command_runs() {
        let cli = Cli::parse_from(["pacer", "rules"]);
        tokio_test::assert_ok!(tokio_test::block_on(Runner::new(cli).run()));
    }

    #[test]
    fn test_missing_config_file_fails() {
        let cli = Cli::parse_from(["pacer", "-C", "/nonexistent/pacer.yaml", "rules"]);
        tokio_test::assert_err!(Runner::new(cli).load_config());
    }
}
