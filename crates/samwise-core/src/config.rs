use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::calendar::DisplayMode;

const RC_ENV_VAR: &str = "SAMWISERC";
const RC_FILE_NAME: &str = ".samwiserc";
const DEFAULT_DATA_DIR: &str = ".samwise";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

/// Where tasks are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendChoice {
  Local,
  Rest {
    url:   String,
    token: Option<String>
  }
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    map.insert(
      "data.location".to_string(),
      format!("~/{DEFAULT_DATA_DIR}")
    );
    map.insert(
      "color".to_string(),
      "on".to_string()
    );
    map.insert(
      "backlog.mode".to_string(),
      DisplayMode::FourDays.as_key().to_string()
    );
    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(rc_override))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading samwiserc");
      cfg.load_file(&path)?;
    } else {
      debug!("no samwiserc found; using defaults");
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(self, overrides))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<Item = (String, String)>
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self
      .map
      .get(key)
      .filter(|v| !v.trim().is_empty())
      .cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self.map.get(key).map(|v| parse_bool(v))
  }

  pub fn color_enabled(&self) -> bool {
    self.get_bool("color").unwrap_or(true)
  }

  pub fn backlog_mode(
    &self
  ) -> anyhow::Result<DisplayMode> {
    let raw = self
      .get("backlog.mode")
      .unwrap_or_else(|| {
        DisplayMode::FourDays.as_key().to_string()
      });
    DisplayMode::parse(&raw).ok_or_else(|| {
      anyhow!(
        "invalid backlog.mode {raw:?}; expected \
         four-days, biweekly or monthly"
      )
    })
  }

  /// Name recorded in the session. Falls
  /// back to `$USER`, then `local`.
  pub fn user(&self) -> String {
    self
      .get("user")
      .or_else(|| std::env::var("USER").ok())
      .unwrap_or_else(|| "local".to_string())
  }

  pub fn backend(&self) -> BackendChoice {
    match self.get("api.url") {
      | Some(url) => BackendChoice::Rest {
        url,
        token: self.get("api.token")
      },
      | None => BackendChoice::Local
    }
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text = fs::read_to_string(&path)
      .with_context(|| {
        format!("failed to read {}", path.display())
      })?;

    self.loaded_files.push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| PathBuf::from("."));

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty() || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path = resolve_include_path(
          &base_dir,
          include_rest.trim()
        )?;
        debug!(
          file = %path.display(),
          include = %include_path.display(),
          line = line_num + 1,
          "processing include"
        );

        if include_path.exists() {
          self.load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) =
        line.split_once('=').ok_or_else(|| {
          anyhow!(
            "invalid config line {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      if key.contains("token") {
        trace!(key = %key, "loaded config key");
      } else {
        trace!(key = %key, value = %value, "loaded config key");
      }
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(cfg, override_dir))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) = override_dir {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir).with_context(|| {
      format!("failed to create {}", dir.display())
    })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(override_path))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) = std::env::var(RC_ENV_VAR) {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(rc_env)));
  }

  let Some(home) = dirs::home_dir() else {
    warn!("cannot determine home directory; skipping samwiserc");
    return Ok(None);
  };
  let candidate = home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
  let home = dirs::home_dir().ok_or_else(|| {
    anyhow!("cannot determine home directory")
  })?;
  Ok(home.join(DEFAULT_DATA_DIR))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(path: &Path) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) = text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim().to_ascii_lowercase().as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rc_file_includes_and_overrides() {
    let dir = tempfile::tempdir().expect("tempdir");
    let extra = dir.path().join("extra.rc");
    fs::write(
      &extra,
      "api.url = http://localhost:8080\n"
    )
    .expect("write include");
    let rc = dir.path().join("samwiserc");
    fs::write(
      &rc,
      "# samwise settings\n\
       backlog.mode = monthly\n\
       color = off # no ansi\n\
       include extra.rc\n"
    )
    .expect("write rc");

    let mut cfg =
      Config::load(Some(&rc)).expect("load rc");
    assert_eq!(cfg.loaded_files.len(), 2);
    assert!(!cfg.color_enabled());
    assert_eq!(
      cfg.backlog_mode().expect("mode"),
      DisplayMode::Monthly
    );
    assert_eq!(
      cfg.backend(),
      BackendChoice::Rest {
        url:   "http://localhost:8080".to_string(),
        token: None
      }
    );

    cfg.apply_overrides([
      ("rc.api.token".to_string(), "abc".to_string()),
      ("backlog.mode".to_string(), "weekly".to_string()),
    ]);
    assert!(matches!(
      cfg.backend(),
      BackendChoice::Rest { token: Some(_), .. }
    ));
    assert!(cfg.backlog_mode().is_err());
  }

  #[test]
  fn malformed_line_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let rc = dir.path().join("samwiserc");
    fs::write(&rc, "just words\n").expect("write rc");
    let err = Config::load(Some(&rc))
      .expect_err("malformed");
    assert!(err.to_string().contains("invalid config line"));
  }

  #[test]
  fn defaults_use_the_local_backend() {
    let cfg = Config::default();
    assert_eq!(cfg.backend(), BackendChoice::Local);
    assert_eq!(
      cfg.backlog_mode().expect("mode"),
      DisplayMode::FourDays
    );
  }
}
