use clap::Parser;
use common::cli::{utils, CommonArgs};
use common::config::Polarity;
use figment::Jail;

#[derive(Parser, Debug)]
struct TestCli {
    #[command(flatten)]
    common: CommonArgs,
}

#[test]
fn test_explicit_config_path_is_loaded() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "skim.toml",
            r#"
            process_name = "SKIM"

            [output]
            module_label = "skimOut"
            output_commands = ["keep *", "drop *_*_*_HLT"]
            default_polarity = "keep"

            [storage]
            dir = "skims"
            file_prefix = "skim"
            "#,
        )?;

        let cli = TestCli::parse_from(["test", "--config", "skim.toml"]);
        let config = utils::load_config(cli.common.config.as_ref()).map_err(|e| e.to_string())?;

        assert_eq!(config.process_name, "SKIM");
        assert_eq!(config.output.module_label, "skimOut");
        assert_eq!(config.output.default_polarity, Polarity::Keep);
        assert_eq!(config.storage.dir, "skims");
        assert_eq!(config.storage.file_prefix, "skim");
        assert!(utils::validate_config(&config).is_ok());
        Ok(())
    });
}

#[test]
fn test_env_overrides_config_file() {
    Jail::expect_with(|jail| {
        jail.create_file("skim.toml", "[output]\nmax_events = 100\n")?;
        jail.set_env("EVENTOUT__OUTPUT__MAX_EVENTS", "5");

        let config = utils::load_config(Some(&"skim.toml".into())).map_err(|e| e.to_string())?;
        assert_eq!(config.output.max_events, Some(5));
        Ok(())
    });
}

#[test]
fn test_invalid_config_fails_validation() {
    Jail::expect_with(|jail| {
        jail.create_file("bad.toml", "[storage]\nmax_events_per_file = 0\n")?;

        let config = utils::load_config(Some(&"bad.toml".into())).map_err(|e| e.to_string())?;
        assert!(utils::validate_config(&config).is_err());
        Ok(())
    });
}

#[test]
fn test_verbosity_flags_select_log_level() {
    let quiet = TestCli::parse_from(["test", "-q"]);
    assert_eq!(utils::log_level(&quiet.common), "warn");

    let verbose = TestCli::parse_from(["test", "--verbose"]);
    assert_eq!(utils::log_level(&verbose.common), "debug");

    let default = TestCli::parse_from(["test"]);
    assert_eq!(utils::log_level(&default.common), "info");
}
