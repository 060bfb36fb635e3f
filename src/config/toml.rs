// Copyright (C) 2023-2024 StorSwift Inc.
// This file is part of the Drand-RS library.

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
// http://www.apache.org/licenses/LICENSE-2.0

// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::ConfigError;

use toml::Table;
use toml::Value;

/// Create Map<String, Value> from (key:&str, value:Value), requires Value to be implemented by ConvertToml::to_value(&self)
macro_rules! map {
    ($($key:literal : $value:expr),* $(,)?) => {
        {
            let kv = [$(($key.to_string(), ::toml::Value::from($value))),*];
            IntoIterator::into_iter(kv).collect::<::toml::Table>()
        }
    };
}

/// Get value by $key:&str, define resulting type of value by $method
macro_rules! get {
    ($map:expr, $key:expr, $method:ident) => {
        $map.get($key)
            .and_then(|v| v.$method())
            .ok_or($crate::config::ConfigError::Missing($key))
    };
}

/// Same as [`get!`] but returns `None` for absent keys and fails only on type mismatch.
macro_rules! get_opt {
    ($map:expr, $key:expr, $method:ident) => {
        match $map.get($key) {
            Some(v) => v
                .$method()
                .map(Some)
                .ok_or($crate::config::ConfigError::InvalidType($key)),
            None => Ok(None),
        }
    };
}

pub(crate) use get;
pub(crate) use get_opt;
pub(crate) use map;

pub trait IntoToml: Sized {
    fn to_value(&self) -> Value;

    fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string(&self.to_value()).map_err(|e| ConfigError::Encode(e.to_string()))
    }
}

pub trait FromToml: Sized {
    fn from_value(value: &Value) -> Result<Self, ConfigError>;

    fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let value = toml::from_str::<Table>(toml).map_err(|e| ConfigError::Decode(e.to_string()))?;
        Self::from_value(&Value::Table(value))
    }
}

/// Returns table for `key` or an empty table if section is absent.
pub fn section<'a>(value: &'a Value, key: &'static str) -> Result<&'a Table, ConfigError> {
    static EMPTY: std::sync::OnceLock<Table> = std::sync::OnceLock::new();

    match value.get(key) {
        Some(v) => v.as_table().ok_or(ConfigError::InvalidType(key)),
        None => Ok(EMPTY.get_or_init(Table::new)),
    }
}
