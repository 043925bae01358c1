//! Server configuration, read from the environment at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use guesstimate_room::{GameConfig, QuestionBank, QuestionBankError};

/// Question set compiled into the binary, used when no file is configured.
const BUNDLED_QUESTIONS: &str = include_str!("../data/questions.json");

const DEFAULT_PORT: u16 = 3001;

/// Everything the binary needs to start a server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: String,

    /// JSON question file. `None` means the bundled set.
    pub questions_path: Option<PathBuf>,

    pub game: GameConfig,

    /// A connection that sends nothing for this long is closed.
    pub idle_timeout: Duration,

    /// Time a new connection gets to send its `Hello`.
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            questions_path: None,
            game: GameConfig::default(),
            idle_timeout: Duration::from_secs(300),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

/// A configuration value could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("cannot read question file {path}: {source}")]
    ReadQuestions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Questions(#[from] QuestionBankError),
}

impl ServerConfig {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key/value source. Unset keys keep their
    /// defaults; set but malformed keys are an error.
    ///
    /// | Key | Meaning |
    /// |-----|---------|
    /// | `PORT` | listen port on `0.0.0.0` (default 3001) |
    /// | `GUESSTIMATE_BIND` | full bind address, overrides `PORT` |
    /// | `GUESSTIMATE_QUESTIONS` | path to a JSON question file |
    /// | `GUESSTIMATE_QUESTION_LIMIT` | rounds per game |
    /// | `GUESSTIMATE_MAX_USERS` | seats per room |
    /// | `GUESSTIMATE_MAX_USERNAME` | display name length limit |
    /// | `GUESSTIMATE_DEFAULT_TOKENS` | starting balance |
    /// | `GUESSTIMATE_MINIMUM_TOKENS` | balance floor after settlement |
    /// | `GUESSTIMATE_RANKING_TIMEOUT_MS` | settlement to ranking reveal delay |
    /// | `GUESSTIMATE_IDLE_TIMEOUT_SECS` | idle connection timeout |
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(port) = parse_var::<u16>(&lookup, "PORT")? {
            config.bind_addr = format!("0.0.0.0:{port}");
        }
        if let Some(bind) = lookup("GUESSTIMATE_BIND").filter(|v| !v.trim().is_empty()) {
            config.bind_addr = bind.trim().to_string();
        }
        config.questions_path = lookup("GUESSTIMATE_QUESTIONS")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let game = &mut config.game;
        if let Some(v) = parse_var(&lookup, "GUESSTIMATE_QUESTION_LIMIT")? {
            game.question_limit = v;
        }
        if let Some(v) = parse_var(&lookup, "GUESSTIMATE_MAX_USERS")? {
            game.max_users_per_room = v;
        }
        if let Some(v) = parse_var(&lookup, "GUESSTIMATE_MAX_USERNAME")? {
            game.max_username_length = v;
        }
        if let Some(v) = parse_var(&lookup, "GUESSTIMATE_DEFAULT_TOKENS")? {
            game.default_tokens = v;
        }
        if let Some(v) = parse_var(&lookup, "GUESSTIMATE_MINIMUM_TOKENS")? {
            game.minimum_tokens = v;
        }
        if let Some(ms) = parse_var(&lookup, "GUESSTIMATE_RANKING_TIMEOUT_MS")? {
            game.inner_ranking_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "GUESSTIMATE_IDLE_TIMEOUT_SECS")? {
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    key: "GUESSTIMATE_IDLE_TIMEOUT_SECS",
                    value: secs.to_string(),
                    reason: "must be at least 1".into(),
                });
            }
            config.idle_timeout = Duration::from_secs(secs);
        }

        config.game = config.game.validated();
        Ok(config)
    }

    /// Loads the configured question file, or the bundled set.
    pub fn load_questions(&self) -> Result<QuestionBank, ConfigError> {
        let Some(path) = &self.questions_path else {
            tracing::info!("using bundled question set");
            return Ok(bundled_questions()?);
        };

        let json = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::ReadQuestions {
                path: path.clone(),
                source,
            }
        })?;
        let bank = QuestionBank::from_json(&json)?;
        tracing::info!(path = %path.display(), questions = bank.len(), "question file loaded");
        Ok(bank)
    }
}

/// The question set compiled into the binary.
pub fn bundled_questions() -> Result<QuestionBank, QuestionBankError> {
    QuestionBank::from_json(BUNDLED_QUESTIONS)
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
}
