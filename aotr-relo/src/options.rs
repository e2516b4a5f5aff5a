use regex::Regex;

pub const OPTIONS_ENV: &str = "AOTR_OPTIONS";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DebugCounterPolicy {
    /// A missing counter fails the whole body.
    #[default]
    HardAbort,
    /// A missing counter leaves its locations untouched.
    SoftSkip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionsError {
    UnknownOption(String),
    MissingValue(&'static str),
    InvalidValue { option: &'static str, value: String },
    InvalidRegex(String),
    UnterminatedBrace,
}

impl std::fmt::Display for OptionsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionsError::UnknownOption(name) => write!(f, "unknown relocation option: {name}"),
            OptionsError::MissingValue(option) => write!(f, "option {option} requires a value"),
            OptionsError::InvalidValue { option, value } => {
                write!(f, "invalid value for {option}: {value}")
            }
            OptionsError::InvalidRegex(err) => write!(f, "invalid inline site filter: {err}"),
            OptionsError::UnterminatedBrace => write!(f, "unterminated '{{' in option string"),
        }
    }
}

impl std::error::Error for OptionsError {}

/// Feature flags consulted while relocating.
#[derive(Clone, Debug)]
pub struct RelocationOptions {
    pub hcr_enabled: bool,
    pub stress_trampolines: bool,
    pub disable_ch_opts: bool,
    pub disabled_inline_sites: Option<Regex>,
    pub debug_counter_policy: DebugCounterPolicy,
    pub log_verbosity: u8,
    pub threshold_checks: bool,
}

impl Default for RelocationOptions {
    fn default() -> Self {
        Self {
            hcr_enabled: false,
            stress_trampolines: false,
            disable_ch_opts: false,
            disabled_inline_sites: None,
            debug_counter_policy: DebugCounterPolicy::default(),
            log_verbosity: 0,
            threshold_checks: true,
        }
    }
}

fn split_options(input: &str) -> Result<Vec<String>, OptionsError> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in input.chars() {
        match ch {
            '{' => {
                depth += 1;
                current.push(ch);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                let item = current.trim();
                if !item.is_empty() {
                    out.push(item.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if depth != 0 {
        return Err(OptionsError::UnterminatedBrace);
    }
    let item = current.trim();
    if !item.is_empty() {
        out.push(item.to_string());
    }
    Ok(out)
}

fn strip_braces(value: &str) -> &str {
    value
        .strip_prefix('{')
        .and_then(|inner| inner.strip_suffix('}'))
        .unwrap_or(value)
}

impl RelocationOptions {
    /// Parses `name[=value]` items separated by commas; braced values may contain commas.
    pub fn parse(input: &str) -> Result<Self, OptionsError> {
        let mut options = Self::default();
        for item in split_options(input)? {
            let (name, value) = match item.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim())),
                None => (item.as_str(), None),
            };
            match name {
                "enableHCR" => options.hcr_enabled = true,
                "stressTrampolines" => options.stress_trampolines = true,
                "disableCHOpts" => options.disable_ch_opts = true,
                "disableReloThresholds" => options.threshold_checks = false,
                "disableInlineSites" => {
                    let value = value.ok_or(OptionsError::MissingValue("disableInlineSites"))?;
                    let pattern = format!("^(?:{})$", strip_braces(value));
                    let regex = Regex::new(&pattern)
                        .map_err(|err| OptionsError::InvalidRegex(err.to_string()))?;
                    options.disabled_inline_sites = Some(regex);
                }
                "debugCounterPolicy" => {
                    let value = value.ok_or(OptionsError::MissingValue("debugCounterPolicy"))?;
                    options.debug_counter_policy = match value {
                        "abort" => DebugCounterPolicy::HardAbort,
                        "skip" => DebugCounterPolicy::SoftSkip,
                        other => {
                            return Err(OptionsError::InvalidValue {
                                option: "debugCounterPolicy",
                                value: other.to_string(),
                            });
                        }
                    };
                }
                "reloVerbose" => {
                    let value = value.unwrap_or("6");
                    let level = value
                        .parse::<u8>()
                        .ok()
                        .filter(|level| *level <= 7)
                        .ok_or_else(|| OptionsError::InvalidValue {
                            option: "reloVerbose",
                            value: value.to_string(),
                        })?;
                    options.log_verbosity = level;
                }
                other => return Err(OptionsError::UnknownOption(other.to_string())),
            }
        }
        Ok(options)
    }

    pub fn from_env() -> Result<Self, OptionsError> {
        match std::env::var(OPTIONS_ENV) {
            Ok(value) => Self::parse(&value),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn is_inline_site_disabled(&self, site_index: u64) -> bool {
        self.disabled_inline_sites
            .as_ref()
            .is_some_and(|regex| regex.is_match(&site_index.to_string()))
    }
}
