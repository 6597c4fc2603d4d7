use chrono::{
  DateTime,
  NaiveDateTime,
  Utc
};
use serde::{
  Deserialize,
  Serialize
};

/// Timestamp layout used by the REST
/// persistence API, always in UTC.
pub const SERVER_DATE_FORMAT: &str =
  "%Y-%m-%d %H:%M:%S";

#[must_use]
pub fn format_server_date(
  dt: DateTime<Utc>
) -> String {
  dt.format(SERVER_DATE_FORMAT)
    .to_string()
}

pub fn parse_server_date(
  raw: &str
) -> Result<DateTime<Utc>, chrono::ParseError>
{
  NaiveDateTime::parse_from_str(
    raw.trim(),
    SERVER_DATE_FORMAT
  )
  .map(|ndt| {
    DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc)
  })
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct ServerTag {
  pub tag_id:   u64,
  pub tag_name: String,
  pub color:    String,
  #[serde(default)]
  pub class_id: Option<String>
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct ServerTask {
  pub task_id:     u64,
  pub content:     String,
  pub tag_id:      u64,
  pub start_date:  String,
  pub end_date:    String,
  #[serde(default)]
  pub completed:   bool,
  #[serde(default)]
  pub in_focus:    bool,
  #[serde(default)]
  pub parent_task: Option<u64>
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct NewTagRequest {
  pub name:  String,
  pub color: String
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct EditTagRequest {
  pub tag_name: String,
  pub color:    String
}

/// Body shared by task and subtask
/// create/edit calls. Subtasks carry
/// their parent's tag and date.
#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct TaskWriteRequest {
  #[serde(default)]
  pub task_id:     Option<u64>,
  pub parent_task: Option<u64>,
  pub content:     String,
  pub start_date:  String,
  pub end_date:    String,
  pub tag_id:      u64,
  pub completed:   bool,
  pub in_focus:    bool
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct CreatedTask {
  pub created: ServerTask
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  Default,
)]
pub struct EmptyBody {}

/// Every write carries the session token
/// next to the payload fields.
#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct Authed<T> {
  #[serde(flatten)]
  pub body:  T,
  pub token: String
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeZone,
    Utc
  };

  use super::*;

  #[test]
  fn server_date_uses_utc_wall_clock() {
    let dt = Utc
      .with_ymd_and_hms(
        2026, 3, 9, 7, 5, 0
      )
      .single()
      .expect("valid date");
    let raw = format_server_date(dt);
    assert_eq!(raw, "2026-03-09 07:05:00");
    assert_eq!(
      parse_server_date(&raw)
        .expect("parse back"),
      dt
    );
  }

  #[test]
  fn authed_body_is_flattened() {
    let body = Authed {
      body:  NewTagRequest {
        name:  "CS 2112".to_string(),
        color: "#abcdef".to_string()
      },
      token: "secret".to_string()
    };
    let value =
      serde_json::to_value(&body)
        .expect("serialize");
    assert_eq!(value["name"], "CS 2112");
    assert_eq!(value["token"], "secret");
  }

  #[test]
  fn server_task_defaults_missing_flags() {
    let raw = r#"{
      "task_id": 4,
      "content": "read",
      "tag_id": 1,
      "start_date": "2026-01-01 00:00:00",
      "end_date": "2026-01-02 00:00:00"
    }"#;
    let task: ServerTask =
      serde_json::from_str(raw)
        .expect("deserialize");
    assert!(!task.completed);
    assert!(!task.in_focus);
    assert_eq!(task.parent_task, None);
  }
}
