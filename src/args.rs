//! Consume-style command-line arguments
//!
//! Flags are pulled out of the token list one at a time; whatever is left
//! when parsing ends is a configuration error naming the first unknown
//! token. This is what lets the driver reject misspelled flags instead of
//! silently running a default problem.

/// Argument parsing errors.
#[derive(Debug, thiserror::Error)]
pub enum ArgsError {
    /// Flag present without a value token after it.
    #[error("flag {0} expects a value")]
    MissingValue(String),
    /// Value token failed to parse.
    #[error("invalid value `{1}` for {0}")]
    BadValue(String, String),
    /// Leftover token after all known flags were consumed.
    #[error("unrecognized argument `{0}`")]
    Unknown(String),
}

/// A token list with consumed-token tracking.
#[derive(Debug, Clone)]
pub struct Args {
    toks: Vec<String>,
    used: Vec<bool>,
}

impl Args {
    /// Wrap a token list.
    pub fn new(toks: Vec<String>) -> Self {
        let used = vec![false; toks.len()];
        Args { toks, used }
    }

    /// Tokens from the process command line, program name skipped.
    pub fn from_command_line() -> Self {
        Self::new(std::env::args().skip(1).collect())
    }

    /// Tokens from a whitespace-separated string (self-test harness).
    pub fn parse_str(s: &str) -> Self {
        Self::new(s.split_whitespace().map(str::to_owned).collect())
    }

    /// Consume `key` and its value if present.
    pub fn consume_i64(&mut self, key: &str) -> Result<Option<i64>, ArgsError> {
        for i in 0..self.toks.len() {
            if !self.used[i] && self.toks[i] == key {
                self.used[i] = true;
                let Some(val) = self.toks.get(i + 1) else {
                    return Err(ArgsError::MissingValue(key.to_owned()));
                };
                self.used[i + 1] = true;
                return val
                    .parse::<i64>()
                    .map(Some)
                    .map_err(|_| ArgsError::BadValue(key.to_owned(), val.clone()));
            }
        }
        Ok(None)
    }

    /// Consume `key`, falling back to `default` when absent.
    pub fn consume_i64_or(&mut self, key: &str, default: i64) -> Result<i64, ArgsError> {
        Ok(self.consume_i64(key)?.unwrap_or(default))
    }

    /// Fail on the first token nothing consumed.
    pub fn finish(self) -> Result<(), ArgsError> {
        for (tok, used) in self.toks.into_iter().zip(self.used) {
            if !used {
                return Err(ArgsError::Unknown(tok));
            }
        }
        Ok(())
    }
}
