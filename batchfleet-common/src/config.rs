// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! One layered configuration loader shared by the Manager and Worker: a TOML
//! file, overridable by environment variables, never `env::var` read ad hoc
//! at call sites (§6).

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

pub struct ConfigLoader<T> {
    path: PathBuf,
    env_prefix: &'static str,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned + Default + serde::Serialize> ConfigLoader<T> {
    pub fn new(path: &Path, env_prefix: &'static str) -> Self {
        Self {
            path: path.to_path_buf(),
            env_prefix,
            _marker: PhantomData,
        }
    }

    /// Loads `T`, layering (in increasing priority) its `Default`, an
    /// optional TOML file at `path` (missing file is not an error — the
    /// defaults and environment still apply), and environment variables
    /// prefixed with `env_prefix` (double-underscore separated for nesting,
    /// e.g. `BATCHFLEET_MANAGER__TICK_SEC=5`).
    pub fn load(&self) -> Result<T, figment::Error> {
        Figment::from(figment::providers::Serialized::defaults(T::default()))
            .merge(Toml::file(&self.path))
            .merge(Env::prefixed(self.env_prefix).split("__"))
            .extract()
    }
}
