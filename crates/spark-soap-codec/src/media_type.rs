use std::fmt;

use crate::error::CodecError;

/// 解析后的 MIME 媒体类型：`type/subtype` 加参数表。
///
/// 类型与参数名统一转为小写，参数值保留原样（去掉引号）。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaType {
    essence: String,
    params: Vec<(String, String)>,
}

impl MediaType {
    pub fn new(essence: &str) -> Self {
        Self {
            essence: essence.trim().to_ascii_lowercase(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    /// 解析 `Content-Type` 取值。
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        let mut segments = split_params(text).into_iter();
        let essence = segments.next().unwrap_or_default();
        let essence = essence.trim();
        let valid = essence
            .split_once('/')
            .is_some_and(|(ty, sub)| !ty.trim().is_empty() && !sub.trim().is_empty());
        if !valid {
            return Err(CodecError::UnsupportedMediaType(text.to_owned()));
        }
        let mut media = Self::new(essence);
        for segment in segments {
            let Some((name, value)) = segment.split_once('=') else {
                continue;
            };
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .map(|v| v.replace("\\\"", "\""))
                .unwrap_or_else(|| value.to_owned());
            media
                .params
                .push((name.trim().to_ascii_lowercase(), value));
        }
        Ok(media)
    }

    /// 小写的 `type/subtype`。
    pub fn essence(&self) -> &str {
        &self.essence
    }

    pub fn is(&self, essence: &str) -> bool {
        self.essence.eq_ignore_ascii_case(essence)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.essence)?;
        for (name, value) in &self.params {
            if needs_quoting(value) {
                write!(f, "; {name}=\"{}\"", value.replace('"', "\\\""))?;
            } else {
                write!(f, "; {name}={value}")?;
            }
        }
        Ok(())
    }
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || value.chars().any(|c| {
            c.is_ascii_whitespace()
                || matches!(
                    c,
                    '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '\\' | '"' | '/' | '[' | ']'
                        | '?' | '='
                )
        })
}

/// 以分号切分，忽略引号内的分号。
fn split_params(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (index, c) in text.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                segments.push(&text[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    segments.push(&text[start..]);
    segments
}
