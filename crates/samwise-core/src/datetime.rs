use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "samwise-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "SAMWISE_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "SAMWISE_TIME_CONFIG";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Timezone used for date buckets and
/// date expressions. Checked in order:
/// `$SAMWISE_TIMEZONE`, the configured
/// value, `samwise-time.toml`, then UTC.
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  if let Some(raw) = configured
    && let Some(tz) =
      parse_timezone(raw, "rc:timezone")
  {
    return tz;
  }

  if let Some(path) = timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  tracing::debug!("no timezone configured; using UTC");
  chrono_tz::UTC
}

fn timezone_config_path() -> Option<PathBuf>
{
  if let Ok(raw) =
    std::env::var(TIMEZONE_CONFIG_ENV_VAR)
  {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(trimmed));
    }
  }

  std::env::current_dir()
    .ok()
    .map(|dir| dir.join(TIMEZONE_CONFIG_FILE))
}

fn load_timezone_from_file(
  path: &Path
) -> Option<Tz> {
  if !path.exists() {
    return None;
  }

  let raw = match fs::read_to_string(path) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed =
    match toml::from_str::<TimezoneConfig>(&raw)
    {
      | Ok(parsed) => parsed,
      | Err(err) => {
        tracing::error!(
          file = %path.display(),
          error = %err,
          "failed parsing timezone config file"
        );
        return None;
      }
    };

  let timezone = parsed.timezone.or_else(|| {
    parsed.time.and_then(|section| section.timezone)
  });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

#[must_use]
pub fn local_today(
  now: DateTime<Utc>,
  tz: Tz
) -> NaiveDate {
  now.with_timezone(&tz).date_naive()
}

fn to_utc(
  local_naive: NaiveDateTime,
  tz: Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  match tz.from_local_datetime(&local_naive) {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(first, second) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      Ok(first.min(second).with_timezone(&Utc))
    }
    | LocalResult::None => Err(anyhow!(
      "local datetime does not exist in \
       timezone {tz}: {context}"
    ))
  }
}

fn local_midnight(
  date: NaiveDate,
  tz: Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  let midnight = date
    .and_hms_opt(0, 0, 0)
    .ok_or_else(|| {
      anyhow!("failed to construct midnight for {date}")
    })?;
  to_utc(midnight, tz, context)
}

/// Parses the date forms the CLI accepts
/// for task dates. Day forms resolve to
/// local midnight in `tz`.
#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower = token.to_ascii_lowercase();
  let today = local_today(now, tz);

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      return local_midnight(today, tz, "today");
    }
    | "tomorrow" => {
      return local_midnight(
        today + Duration::days(1),
        tz,
        "tomorrow"
      );
    }
    | "yesterday" => {
      return local_midnight(
        today - Duration::days(1),
        tz,
        "yesterday"
      );
    }
    | _ => {}
  }

  if let Some(target) = parse_weekday_name(&lower)
  {
    return local_midnight(
      next_weekday_date(today, target),
      tz,
      "weekday-name"
    );
  }

  let rel_re =
    Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dwh])$")
      .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) = rel_re.captures(&lower) {
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| anyhow!("missing relative amount"))?
      .parse()
      .context("invalid relative number")?;
    let negative = caps
      .name("sign")
      .is_some_and(|m| m.as_str() == "-");
    let num = if negative { -num } else { num };
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| anyhow!("missing relative unit"))?;

    return match unit {
      | "d" => local_midnight(
        today + Duration::days(num),
        tz,
        "relative-days"
      ),
      | "w" => local_midnight(
        today + Duration::weeks(num),
        tz,
        "relative-weeks"
      ),
      | "h" => Ok(now + Duration::hours(num)),
      | _ => Err(anyhow!("unknown relative unit: {unit}"))
    };
  }

  if let Ok(dt) = DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(token, "%Y-%m-%d")
  {
    return local_midnight(date, tz, "date");
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(token, "%m/%d/%Y")
  {
    return local_midnight(date, tz, "us-date");
  }

  for fmt in ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(token, fmt)
    {
      return to_utc(ndt, tz, fmt);
    }
  }

  Err(anyhow!("unrecognized date expression: {input}"))
    .with_context(|| {
      "supported formats: now/today/tomorrow/yesterday, \
       weekday names (e.g. monday), +Nd/+Nw/+Nh, RFC3339, \
       YYYY-MM-DD, M/D/YYYY, YYYY-MM-DD HH:MM"
    })
}

fn parse_weekday_name(token: &str) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => Some(Weekday::Mon),
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => Some(Weekday::Wed),
    | "thursday" | "thu" | "thur" | "thurs" => {
      Some(Weekday::Thu)
    }
    | "friday" | "fri" => Some(Weekday::Fri),
    | "saturday" | "sat" => Some(Weekday::Sat),
    | "sunday" | "sun" => Some(Weekday::Sun),
    | _ => None
  }
}

/// Next date falling on `target`, never
/// `from` itself.
fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx =
    from.weekday().num_days_from_monday() as i64;
  let target_idx =
    target.num_days_from_monday() as i64;
  let mut delta = (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(delta))
    .unwrap_or(from)
}
