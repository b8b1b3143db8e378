use clap::Parser;
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_FILE;
use crate::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "flux")]
#[command(version)]
#[command(about = "Explore branching LLM conversations as a tree")]
pub struct Args {
    /// Start a new conversation tree seeded with this user message
    #[arg(long)]
    pub new_tree_with: Option<String>,

    /// Launch URL; a `newTreeWith` query parameter seeds a new tree
    #[arg(long)]
    pub url: Option<String>,

    /// Path to the TOML config file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Directory for persisted state (overrides the config file)
    #[arg(long)]
    pub store_dir: Option<PathBuf>,

    /// Model name (e.g. gpt-4)
    #[arg(long)]
    pub model: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    pub temp: Option<f32>,

    /// Number of responses per generation
    #[arg(short, long)]
    pub n: Option<u32>,

    /// Enable debug logging
    #[arg(long, short)]
    pub verbose: bool,

    /// Print shell completions and exit
    #[arg(long, value_enum)]
    pub completions: Option<Shell>,
}

impl Args {
    /// Apply model/temp/n overrides on top of stored settings.
    pub fn apply_overrides(&self, mut settings: Settings) -> Settings {
        if let Some(model) = &self.model {
            settings.model = model.clone();
        }
        if let Some(temp) = self.temp {
            settings.temp = temp;
        }
        if let Some(n) = self.n {
            settings.n = n;
        }
        settings.sanitized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_minimal() {
        let args = Args::parse_from(["flux"]);
        assert_eq!(args.new_tree_with, None);
        assert_eq!(args.url, None);
        assert_eq!(args.config, PathBuf::from("flux.toml"));
        assert!(!args.verbose);
        assert!(args.completions.is_none());
    }

    #[test]
    fn test_args_parse_new_tree_with() {
        let args = Args::parse_from(["flux", "--new-tree-with", "Hello there"]);
        assert_eq!(args.new_tree_with.as_deref(), Some("Hello there"));
    }

    #[test]
    fn test_args_parse_overrides() {
        let args = Args::parse_from(["flux", "--model", "gpt-4", "--temp", "0.7", "-n", "5"]);
        let settings = args.apply_overrides(Settings::default());
        assert_eq!(settings.model, "gpt-4");
        assert_eq!(settings.temp, 0.7);
        assert_eq!(settings.n, 5);
    }

    #[test]
    fn test_overrides_are_sanitized() {
        let args = Args::parse_from(["flux", "-n", "0"]);
        assert_eq!(args.apply_overrides(Settings::default()).n, 1);
    }

    #[test]
    fn test_no_overrides_keeps_settings() {
        let args = Args::parse_from(["flux"]);
        let settings = Settings { n: 7, ..Settings::default() };
        assert_eq!(args.apply_overrides(settings.clone()).n, 7);
    }

    #[test]
    fn test_args_parse_completions() {
        let args = Args::parse_from(["flux", "--completions", "bash"]);
        assert_eq!(args.completions, Some(Shell::Bash));
    }
}
