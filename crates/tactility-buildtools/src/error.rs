use std::fmt;

#[derive(Debug)]
pub struct Error {
    msg: String,
    code: i32,
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self {
            msg: msg.into(),
            code: 1,
        }
    }

    /// Same as [`Error::msg`], but terminates the process with `code` when it reaches `main`.
    pub fn with_code<M: Into<String>>(code: i32, msg: M) -> Self {
        Self {
            msg: msg.into(),
            code,
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::msg(format!("json error: {err}"))
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Self::msg(format!("csv error: {err}"))
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Self::msg(format!("zip error: {err}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::msg(format!("HTTP request failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
