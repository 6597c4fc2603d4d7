//! Projection of the task collection
//! onto calendar windows. Everything here
//! is a pure function of the state and
//! an explicit `today`.

use chrono::{
  Datelike,
  Duration,
  NaiveDate
};

use crate::model::{
  ColorConfig,
  NONE_TAG_COLOR,
  SubTask,
  Task
};
use crate::state::State;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
)]
pub enum DisplayMode {
  #[default]
  FourDays,
  Biweekly,
  Monthly
}

impl DisplayMode {
  pub fn parse(raw: &str) -> Option<Self> {
    match raw
      .trim()
      .to_ascii_lowercase()
      .replace(['-', '_'], "")
      .as_str()
    {
      | "fourdays" | "4days" | "4" => {
        Some(Self::FourDays)
      }
      | "biweekly" | "2weeks" => {
        Some(Self::Biweekly)
      }
      | "monthly" | "month" => {
        Some(Self::Monthly)
      }
      | _ => None
    }
  }

  pub fn as_key(self) -> &'static str {
    match self {
      | Self::FourDays => "four-days",
      | Self::Biweekly => "biweekly",
      | Self::Monthly => "monthly"
    }
  }
}

/// A task as drawn in the backlog: with
/// its subtasks and its tag's color.
#[derive(Debug, Clone, PartialEq)]
pub struct ColoredTask {
  pub task:     Task,
  pub subtasks: Vec<SubTask>,
  pub color:    String
}

#[derive(Debug, Clone, PartialEq)]
pub struct OneDayTasks {
  pub date:  NaiveDate,
  pub tasks: Vec<ColoredTask>
}

/// First visible day and first day past
/// the window.
pub fn compute_start_and_end_day(
  mode: DisplayMode,
  offset: i32,
  today: NaiveDate
) -> (NaiveDate, NaiveDate) {
  let steps = i64::from(offset);
  match mode {
    | DisplayMode::FourDays => {
      let start = add_days(today, steps * 4);
      (start, add_days(start, 4))
    }
    | DisplayMode::Biweekly => {
      let sunday = add_days(
        today,
        -i64::from(
          today.weekday().num_days_from_sunday()
        )
      );
      let start = add_days(sunday, steps * 14);
      (start, add_days(start, 14))
    }
    | DisplayMode::Monthly => {
      let shifted = shift_months(
        first_day_of_month(
          today.year(),
          today.month()
        ),
        offset
      );
      let start = add_days(
        shifted,
        -i64::from(
          shifted
            .weekday()
            .num_days_from_sunday()
        )
      );
      let months_ahead =
        if start.day() == 1 { 1 } else { 2 };
      let end = shift_months(
        first_day_of_month(
          start.year(),
          start.month()
        ),
        months_ahead
      );
      (start, end)
    }
  }
}

#[tracing::instrument(skip(state, colors))]
pub fn build_days_in_backlog(
  state: &State,
  colors: &ColorConfig,
  mode: DisplayMode,
  offset: i32,
  today: NaiveDate
) -> Vec<OneDayTasks> {
  let (start, end) =
    compute_start_and_end_day(mode, offset, today);
  let mut days = Vec::new();
  let mut day = start;
  while day < end {
    let mut tasks: Vec<ColoredTask> = state
      .tasks_on(day)
      .into_iter()
      .map(|task| ColoredTask {
        task:     task.clone(),
        subtasks: state
          .subtasks_of(&task.id)
          .into_iter()
          .cloned()
          .collect(),
        color:    colors
          .get(&task.tag)
          .cloned()
          .unwrap_or_else(|| {
            NONE_TAG_COLOR.to_string()
          })
      })
      .collect();
    tasks.sort_by(|a, b| {
      a.task
        .date
        .cmp(&b.task.date)
        .then_with(|| a.task.id.cmp(&b.task.id))
    });
    days.push(OneDayTasks { date: day, tasks });
    day = add_days(day, 1);
  }
  tracing::debug!(
    days = days.len(),
    %start,
    %end,
    "built backlog days"
  );
  days
}

/// `M/D/YYYY - M/D/YYYY` for the short
/// windows, `Month YYYY` for months.
pub fn backlog_header_title(
  mode: DisplayMode,
  offset: i32,
  today: NaiveDate
) -> String {
  match mode {
    | DisplayMode::FourDays
    | DisplayMode::Biweekly => {
      let (start, end) =
        compute_start_and_end_day(
          mode, offset, today
        );
      let last = add_days(end, -1);
      format!(
        "{} - {}",
        start.format("%-m/%-d/%Y"),
        last.format("%-m/%-d/%Y")
      )
    }
    | DisplayMode::Monthly => {
      let month = shift_months(
        first_day_of_month(
          today.year(),
          today.month()
        ),
        offset
      );
      month.format("%B %Y").to_string()
    }
  }
}

/// Number of visible items. Completed
/// tasks and subtasks are left out unless
/// `include_completed` is set.
pub fn count_tasks(
  tasks: &[ColoredTask],
  include_subtasks: bool,
  include_completed: bool
) -> usize {
  let counts =
    |complete: bool| include_completed || !complete;
  tasks
    .iter()
    .map(|t| {
      let own = usize::from(counts(t.task.complete));
      if !include_subtasks {
        return own;
      }
      own
        + t
          .subtasks
          .iter()
          .filter(|s| counts(s.complete))
          .count()
    })
    .sum()
}

fn shift_months(
  date: NaiveDate,
  months: i32
) -> NaiveDate {
  let mut year = date.year();
  let mut month =
    date.month() as i32 + months;

  while month < 1 {
    month += 12;
    year = year.saturating_sub(1);
  }
  while month > 12 {
    month -= 12;
    year = year.saturating_add(1);
  }

  let month = month as u32;
  let day = date
    .day()
    .min(days_in_month(year, month));
  NaiveDate::from_ymd_opt(year, month, day)
    .unwrap_or(date)
}

fn first_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  NaiveDate::from_ymd_opt(year, month, 1)
    .unwrap_or(NaiveDate::MIN)
}

fn days_in_month(
  year: i32,
  month: u32
) -> u32 {
  let (next_year, next_month) =
    if month >= 12 {
      (year.saturating_add(1), 1_u32)
    } else {
      (year, month + 1)
    };
  add_days(
    first_day_of_month(
      next_year, next_month
    ),
    -1
  )
  .day()
}

pub(crate) fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  date
    .checked_add_signed(Duration::days(days))
    .unwrap_or(date)
}
