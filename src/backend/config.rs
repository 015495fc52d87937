use ConfigError;

/// Backend selection, parsed from the `watchdog` option's
/// `<name>[:<spec>]` form.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendConfig {
    /// No probing at all.
    Null,
    /// Probe by running an external command; see `ExecBackend`.
    Exec { cmd: String },
}

impl BackendConfig {
    pub fn parse(token: &str) -> Result<BackendConfig, ConfigError> {
        let (name, spec) = match token.find(':') {
            Some(i) => (&token[..i], &token[i + 1..]),
            None => (token, ""),
        };

        match name {
            "" => Ok(BackendConfig::Null),
            "exec" => {
                if spec.trim().is_empty() {
                    Err("exec watchdog requires a command".into())
                } else {
                    Ok(BackendConfig::Exec { cmd: spec.to_string() })
                }
            }
            _ => Err(format!("unknown watchdog backend: {}", name).into()),
        }
    }
}

#[test]
fn empty_selects_null() {
    assert_eq!(BackendConfig::parse("").unwrap(), BackendConfig::Null);
}

#[test]
fn exec_keeps_the_whole_spec() {
    // only the first colon separates the name
    let config = BackendConfig::parse("exec:probe --addr host:port").unwrap();
    assert_eq!(config,
               BackendConfig::Exec { cmd: "probe --addr host:port".to_string() });
}

#[test]
fn exec_requires_a_command() {
    assert!(BackendConfig::parse("exec").is_err());
    assert!(BackendConfig::parse("exec:").is_err());
    assert!(BackendConfig::parse("exec:   ").is_err());
}

#[test]
fn unknown_backends_are_fatal() {
    assert!(BackendConfig::parse("script").is_err());
    assert!(BackendConfig::parse("tcp:connect").is_err());
}
