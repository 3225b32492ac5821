//! The binding mini-language.
//!
//! A binding line is a whitespace-separated list of parameters, each of the
//! form `key`, `key=p1,p2` or `key=value:p1,p2`. The first parameter's key
//! names the binding, e.g. `dmx=stage:1,2 ON=500:255,128 OFF=500:0,0`.

use std::str::FromStr;

use crate::error::ConfigError;

/// One `key=value:p1,p2` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingParam {
    pub key: String,
    pub value: Option<String>,
    pub params: Vec<String>,
}

impl BindingParam {
    /// Parse the n-th positional parameter.
    pub fn param<T: FromStr>(&self, index: usize) -> Result<Option<T>, ConfigError> {
        self.params
            .get(index)
            .map(|raw| {
                raw.parse().map_err(|_| ConfigError::InvalidValue {
                    key: self.key.clone(),
                    value: raw.clone(),
                })
            })
            .transpose()
    }

    /// Parse the value, when present.
    pub fn parsed_value<T: FromStr>(&self) -> Result<Option<T>, ConfigError> {
        self.value
            .as_deref()
            .map(|raw| {
                raw.parse().map_err(|_| ConfigError::InvalidValue {
                    key: self.key.clone(),
                    value: raw.to_string(),
                })
            })
            .transpose()
    }
}

impl FromStr for BindingParam {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, rest) = match s.split_once('=') {
            Some((key, rest)) => (key.trim(), Some(rest)),
            None => (s.trim(), None),
        };
        if key.is_empty() {
            return Err(ConfigError::Syntax(s.to_string()));
        }
        let (value, params) = match rest {
            None => (None, ""),
            Some(rest) => match rest.split_once(':') {
                Some((value, params)) => (Some(value.trim()), params),
                None => (None, rest),
            },
        };
        Ok(Self {
            key: key.to_string(),
            value: value.filter(|v| !v.is_empty()).map(str::to_string),
            params: params
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }
}

/// A parsed binding line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingConfig {
    params: Vec<BindingParam>,
}

impl BindingConfig {
    /// The binding name, i.e. the first parameter's key.
    #[must_use]
    pub fn binding_name(&self) -> &str {
        &self.head().key
    }

    /// The first parameter, which addresses the device.
    #[must_use]
    pub fn head(&self) -> &BindingParam {
        &self.params[0]
    }

    /// Parameters after the first.
    #[must_use]
    pub fn options(&self) -> &[BindingParam] {
        &self.params[1..]
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&BindingParam> {
        self.params.iter().find(|p| p.key.eq_ignore_ascii_case(key))
    }
}

impl FromStr for BindingConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let params = s
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<Vec<BindingParam>, _>>()?;
        if params.is_empty() {
            return Err(ConfigError::Syntax(s.to_string()));
        }
        Ok(Self { params })
    }
}
