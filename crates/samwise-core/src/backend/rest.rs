use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use reqwest::{
  Client,
  Method,
  Url
};
use samwise_shared::{
  Authed,
  CreatedTask,
  EditTagRequest,
  EmptyBody,
  NewTagRequest,
  ServerTag,
  ServerTask,
  TaskWriteRequest,
  format_server_date,
  parse_server_date
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{
  debug,
  instrument
};

use super::{
  Backend,
  LoadedData
};
use crate::error::SyncError;
use crate::model::{
  Id,
  SubTask,
  Tag,
  Task
};

/// Wire id of the `None` tag.
const NONE_TAG_WIRE_ID: u64 = 0;

/// Client for the `/api/tags/...` and
/// `/api/tasks/...` HTTP surface.
#[derive(Debug, Clone)]
pub struct RestBackend {
  client:   Client,
  base_url: String,
  token:    Option<String>
}

impl RestBackend {
  pub fn new(
    base_url: &str,
    token: Option<String>
  ) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self {
      client,
      base_url: base_url
        .trim_end_matches('/')
        .to_string(),
      token
    })
  }

  fn token(&self) -> Result<&str, SyncError> {
    self
      .token
      .as_deref()
      .ok_or(SyncError::NotLoggedIn)
  }

  fn url(
    &self,
    endpoint: &str
  ) -> anyhow::Result<Url> {
    let raw =
      format!("{}/api{endpoint}", self.base_url);
    Url::parse(&raw)
      .with_context(|| format!("invalid url {raw}"))
  }

  #[instrument(skip(self))]
  async fn get<T: DeserializeOwned>(
    &self,
    endpoint: &str
  ) -> anyhow::Result<T> {
    let token = self.token()?;
    let mut url = self.url(endpoint)?;
    url
      .query_pairs_mut()
      .append_pair("token", token);
    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| http_error(endpoint, e))?
      .error_for_status()
      .map_err(|e| http_error(endpoint, e))?;
    let body = response
      .text()
      .await
      .map_err(|e| http_error(endpoint, e))?;
    serde_json::from_str(&body).with_context(|| {
      format!("failed parsing response of {endpoint}")
    })
  }

  #[instrument(skip(self, body))]
  async fn send<B: Serialize>(
    &self,
    method: Method,
    endpoint: &str,
    body: B
  ) -> anyhow::Result<String> {
    let token = self.token()?.to_string();
    let payload = serde_json::to_string(&Authed {
      body,
      token
    })?;
    let response = self
      .client
      .request(method, self.url(endpoint)?)
      .header("Content-Type", "application/json")
      .body(payload)
      .send()
      .await
      .map_err(|e| http_error(endpoint, e))?
      .error_for_status()
      .map_err(|e| http_error(endpoint, e))?;
    let text = response
      .text()
      .await
      .map_err(|e| http_error(endpoint, e))?;
    debug!(endpoint, bytes = text.len(), "request done");
    Ok(text)
  }

  async fn post<B: Serialize>(
    &self,
    endpoint: &str,
    body: B
  ) -> anyhow::Result<String> {
    self.send(Method::POST, endpoint, body).await
  }

  async fn put<B: Serialize>(
    &self,
    endpoint: &str,
    body: B
  ) -> anyhow::Result<String> {
    self.send(Method::PUT, endpoint, body).await
  }
}

impl Backend for RestBackend {
  #[instrument(skip(self))]
  async fn load_all(
    &self
  ) -> anyhow::Result<LoadedData> {
    let server_tags: Vec<ServerTag> =
      self.get("/tags/all").await?;
    let server_tasks: Vec<ServerTask> =
      self.get("/tasks/all").await?;

    let tags = server_tags
      .into_iter()
      .map(tag_from_server)
      .collect();

    let mut tasks = Vec::new();
    let mut subtasks = Vec::new();
    let mut orders: BTreeMap<u64, u32> =
      BTreeMap::new();
    for server_task in server_tasks {
      match server_task.parent_task {
        | None => {
          tasks.push(task_from_server(&server_task)?)
        }
        | Some(parent) => {
          let order =
            orders.entry(parent).or_insert(0);
          subtasks.push(subtask_from_server(
            &server_task,
            parent,
            *order
          ));
          *order += 1;
        }
      }
    }

    let data = LoadedData {
      tags,
      tasks,
      subtasks
    };
    data.validate()?;
    Ok(data)
  }

  #[instrument(skip(self, tag), fields(tag = %tag.id))]
  async fn create_tag(
    &self,
    tag: Tag
  ) -> anyhow::Result<Tag> {
    let raw = self
      .post("/tags/new", NewTagRequest {
        name:  tag.name.clone(),
        color: tag.color.clone()
      })
      .await?;
    let created: ServerTag =
      serde_json::from_str(&raw)
        .context("failed parsing created tag")?;
    Ok(Tag {
      id: Id::from(created.tag_id),
      ..tag
    })
  }

  #[instrument(skip(self, tag), fields(tag = %tag.id))]
  async fn edit_tag(
    &self,
    tag: Tag
  ) -> anyhow::Result<()> {
    let id = wire_id(&tag.id)?;
    self
      .post(&format!("/tags/{id}/edit"), EditTagRequest {
        tag_name: tag.name,
        color:    tag.color
      })
      .await?;
    Ok(())
  }

  #[instrument(skip(self))]
  async fn delete_tag(
    &self,
    id: Id
  ) -> anyhow::Result<()> {
    let id = wire_id(&id)?;
    self
      .put(&format!("/tags/{id}/delete"), EmptyBody {})
      .await?;
    Ok(())
  }

  #[instrument(skip(self, task), fields(task = %task.id))]
  async fn create_task(
    &self,
    task: Task
  ) -> anyhow::Result<Task> {
    let body = TaskWriteRequest {
      task_id:     None,
      parent_task: None,
      content:     task.name.clone(),
      start_date:  format_server_date(Utc::now()),
      end_date:    format_server_date(task.date),
      tag_id:      tag_wire_id(&task.tag)?,
      completed:   task.complete,
      in_focus:    task.in_focus
    };
    let raw = self.post("/tasks/new", body).await?;
    let created: CreatedTask =
      serde_json::from_str(&raw)
        .context("failed parsing created task")?;
    Ok(Task {
      id: Id::from(created.created.task_id),
      ..task
    })
  }

  #[instrument(skip(self, task), fields(task = %task.id))]
  async fn edit_task(
    &self,
    task: Task
  ) -> anyhow::Result<()> {
    let id = wire_id(&task.id)?;
    let body = TaskWriteRequest {
      task_id:     Some(id),
      parent_task: None,
      content:     task.name,
      start_date:  format_server_date(Utc::now()),
      end_date:    format_server_date(task.date),
      tag_id:      tag_wire_id(&task.tag)?,
      completed:   task.complete,
      in_focus:    task.in_focus
    };
    self
      .post(&format!("/tasks/{id}/edit"), body)
      .await?;
    Ok(())
  }

  #[instrument(skip(self, subtasks))]
  async fn delete_task(
    &self,
    id: Id,
    subtasks: Vec<Id>
  ) -> anyhow::Result<()> {
    for subtask in subtasks {
      self.delete_subtask(subtask).await?;
    }
    let id = wire_id(&id)?;
    self
      .put(&format!("/tasks/{id}/delete"), EmptyBody {})
      .await?;
    Ok(())
  }

  #[instrument(skip(self, parent, subtask), fields(parent = %parent.id, subtask = %subtask.id))]
  async fn create_subtask(
    &self,
    parent: Task,
    subtask: SubTask
  ) -> anyhow::Result<SubTask> {
    let body = subtask_body(&parent, &subtask, None)?;
    let raw = self.post("/tasks/new", body).await?;
    let created: CreatedTask =
      serde_json::from_str(&raw)
        .context("failed parsing created subtask")?;
    Ok(SubTask {
      id: Id::from(created.created.task_id),
      parent: parent.id,
      ..subtask
    })
  }

  #[instrument(skip(self, parent, subtask), fields(parent = %parent.id, subtask = %subtask.id))]
  async fn edit_subtask(
    &self,
    parent: Task,
    subtask: SubTask
  ) -> anyhow::Result<()> {
    let id = wire_id(&subtask.id)?;
    let body =
      subtask_body(&parent, &subtask, Some(id))?;
    self
      .post(&format!("/tasks/{id}/edit"), body)
      .await?;
    Ok(())
  }

  #[instrument(skip(self))]
  async fn delete_subtask(
    &self,
    id: Id
  ) -> anyhow::Result<()> {
    let id = wire_id(&id)?;
    self
      .put(&format!("/tasks/{id}/delete"), EmptyBody {})
      .await?;
    Ok(())
  }
}

fn http_error(
  endpoint: &str,
  err: reqwest::Error
) -> SyncError {
  SyncError::Http {
    endpoint: endpoint.to_string(),
    message:  err.to_string()
  }
}

fn wire_id(id: &Id) -> Result<u64, SyncError> {
  id.as_str()
    .parse::<u64>()
    .map_err(|_| SyncError::NotPersisted(id.clone()))
}

fn tag_wire_id(id: &Id) -> Result<u64, SyncError> {
  if id == &Id::none_tag() {
    Ok(NONE_TAG_WIRE_ID)
  } else {
    wire_id(id)
  }
}

fn tag_from_wire(raw: u64) -> Id {
  if raw == NONE_TAG_WIRE_ID {
    Id::none_tag()
  } else {
    Id::from(raw)
  }
}

fn subtask_body(
  parent: &Task,
  subtask: &SubTask,
  task_id: Option<u64>
) -> Result<TaskWriteRequest, SyncError> {
  Ok(TaskWriteRequest {
    task_id,
    parent_task: Some(wire_id(&parent.id)?),
    content: subtask.name.clone(),
    start_date: format_server_date(Utc::now()),
    end_date: format_server_date(parent.date),
    tag_id: tag_wire_id(&parent.tag)?,
    completed: subtask.complete,
    in_focus: subtask.in_focus
  })
}

fn tag_from_server(tag: ServerTag) -> Tag {
  Tag {
    id:       tag_from_wire(tag.tag_id),
    name:     tag.tag_name,
    color:    tag.color,
    class_id: tag.class_id
  }
}

fn task_from_server(
  task: &ServerTask
) -> anyhow::Result<Task> {
  let date = parse_server_date(&task.end_date)
    .with_context(|| {
      format!(
        "invalid end_date on task {}",
        task.task_id
      )
    })?;
  Ok(Task {
    id: Id::from(task.task_id),
    name: task.content.clone(),
    tag: tag_from_wire(task.tag_id),
    date,
    complete: task.completed,
    in_focus: task.in_focus
  })
}

fn subtask_from_server(
  task: &ServerTask,
  parent: u64,
  order: u32
) -> SubTask {
  SubTask {
    id: Id::from(task.task_id),
    parent: Id::from(parent),
    order,
    name: task.content.clone(),
    complete: task.completed,
    in_focus: task.in_focus
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn server_task(
    id: u64,
    parent: Option<u64>
  ) -> ServerTask {
    ServerTask {
      task_id:     id,
      content:     format!("task {id}"),
      tag_id:      0,
      start_date:  "2026-10-01 00:00:00".to_string(),
      end_date:    "2026-10-16 12:00:00".to_string(),
      completed:   false,
      in_focus:    true,
      parent_task: parent
    }
  }

  #[test]
  fn none_tag_maps_to_wire_zero() {
    assert_eq!(
      tag_wire_id(&Id::none_tag()).expect("wire id"),
      0
    );
    assert_eq!(tag_from_wire(0), Id::none_tag());
    assert_eq!(tag_from_wire(5), Id::from(5));
  }

  #[test]
  fn temporary_ids_are_not_sent() {
    let err = wire_id(&Id::temp())
      .expect_err("temp id has no wire form");
    assert!(matches!(err, SyncError::NotPersisted(_)));
  }

  #[test]
  fn server_rows_split_into_tasks_and_subtasks() {
    let task = task_from_server(&server_task(3, None))
      .expect("valid task");
    assert_eq!(task.id, Id::from(3));
    assert_eq!(task.tag, Id::none_tag());
    assert!(task.in_focus);

    let sub = subtask_from_server(
      &server_task(4, Some(3)),
      3,
      1
    );
    assert_eq!(sub.parent, Id::from(3));
    assert_eq!(sub.order, 1);
  }

  #[tokio::test]
  async fn calls_without_token_fail_before_any_io() {
    let backend =
      RestBackend::new("http://127.0.0.1:9", None)
        .expect("client");
    let err = backend
      .load_all()
      .await
      .expect_err("not logged in");
    assert!(matches!(
      err.downcast_ref::<SyncError>(),
      Some(SyncError::NotLoggedIn)
    ));
  }
}
