use std::io::IsTerminal;

use crate::core::config::Settings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub format: OutputFormat,
    pub pretty: bool,
    pub use_color: bool,
    pub verbose: bool,
}

impl OutputOptions {
    /// Command-line flags win over the config file's defaults.
    pub fn resolve(json_flag: bool, pretty: bool, no_color: bool, verbose: bool, settings: &Settings) -> Self {
        let format = if json_flag || settings.default_format == "json" {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        };
        let use_color = match settings.color.as_str() {
            _ if no_color => false,
            "never" => false,
            "always" => true,
            _ => detect_color(),
        };
        Self {
            format,
            pretty,
            use_color,
            verbose,
        }
    }
}

pub fn detect_color() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    std::io::stdout().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings() {
        let settings = Settings {
            default_format: "json".into(),
            color: "always".into(),
        };
        let opts = OutputOptions::resolve(false, false, true, false, &settings);
        assert_eq!(opts.format, OutputFormat::Json);
        assert!(!opts.use_color);

        let opts = OutputOptions::resolve(false, true, false, false, &settings);
        assert!(opts.use_color);
        assert!(opts.pretty);
    }

    #[test]
    fn text_is_the_default_format() {
        let settings = Settings {
            default_format: "text".into(),
            color: "never".into(),
        };
        let opts = OutputOptions::resolve(false, false, false, false, &settings);
        assert_eq!(opts.format, OutputFormat::Text);
        assert!(!opts.use_color);
        let opts = OutputOptions::resolve(true, false, false, false, &settings);
        assert_eq!(opts.format, OutputFormat::Json);
    }
}
