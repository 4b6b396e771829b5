//! Configuration types for Turnstile.
//!
//! A server is described by one YAML file listing its gated listeners:
//!
//! ```yaml
//! listeners:
//!   - name: public
//!     bind: 0.0.0.0:8080
//!     max_connections: ${PUBLIC_MAX_CONNECTIONS:-1024}
//! metrics:
//!   bind: 127.0.0.1:9100
//! ```

pub mod env;
pub mod loader;
pub mod types;

pub use env::*;
pub use loader::*;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serializes_to_yaml() {
        let config = ConfigLoader::parse(
            "listeners:\n  - name: public\n    bind: 127.0.0.1:8080\n    max_connections: 2\n",
        )
        .unwrap();
        let yaml = serde_yaml::to_string(&config).unwrap();

        assert!(yaml.contains("listeners:"));
        assert!(yaml.contains("name: public"));
        assert!(yaml.contains("max_connections: 2"));
        assert!(yaml.contains("handler: echo"));
        assert!(yaml.contains("timeout_secs: 30"));
    }

    #[test]
    fn test_handler_kind_is_snake_case() {
        let parsed: HandlerKind = serde_yaml::from_str("discard").unwrap();
        assert_eq!(parsed, HandlerKind::Discard);
        assert!(serde_yaml::from_str::<HandlerKind>("Discard").is_err());
    }
}
