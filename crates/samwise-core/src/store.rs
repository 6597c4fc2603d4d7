use std::sync::Arc;

use chrono_tz::Tz;
use parking_lot::Mutex;
use tracing::{
  debug,
  info
};

use crate::action::Action;
use crate::reducer::reduce;
use crate::state::State;

/// Who is logged in. `token` is what the
/// REST backend sends with each call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
  pub user:  String,
  pub token: Option<String>
}

impl Session {
  pub fn local(user: impl Into<String>) -> Self {
    Self {
      user:  user.into(),
      token: None
    }
  }
}

/// Owner of the entity state. All
/// mutation goes through [`Store::dispatch`].
#[derive(Debug)]
pub struct Store {
  state:    State,
  session:  Option<Session>,
  revision: u64
}

pub type SharedStore = Arc<Mutex<Store>>;

impl Store {
  pub fn new(timezone: Tz) -> Self {
    Self {
      state:    State::new(timezone),
      session:  None,
      revision: 0
    }
  }

  pub fn shared(self) -> SharedStore {
    Arc::new(Mutex::new(self))
  }

  pub fn state(&self) -> &State {
    &self.state
  }

  pub fn snapshot(&self) -> State {
    self.state.clone()
  }

  /// Bumped on every dispatch; front-ends
  /// compare it to decide when to redraw.
  pub fn revision(&self) -> u64 {
    self.revision
  }

  pub fn session(&self) -> Option<&Session> {
    self.session.as_ref()
  }

  #[tracing::instrument(skip(self, action), fields(kind = action.kind()))]
  pub fn dispatch(
    &mut self,
    action: Action
  ) -> &State {
    let timezone = self.state.timezone();
    let current = std::mem::replace(
      &mut self.state,
      State::new(timezone)
    );
    self.state = reduce(current, &action);
    self.revision += 1;
    debug!(revision = self.revision, "dispatched");

    #[cfg(debug_assertions)]
    if let Err(err) = self.state.check_invariants()
    {
      tracing::error!(error = %err, kind = action.kind(), "state invariant violated");
    }

    &self.state
  }

  #[tracing::instrument(skip(self), fields(user = %session.user))]
  pub fn login(&mut self, session: Session) {
    info!("session started");
    self.session = Some(session);
  }

  /// Drops the session and every entity.
  /// The timezone survives.
  #[tracing::instrument(skip(self))]
  pub fn logout(&mut self) {
    info!("session ended; clearing store");
    self.session = None;
    self.state = State::new(self.state.timezone());
    self.revision += 1;
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;
  use crate::action::patch_tasks;
  use crate::model::{
    Id,
    Task
  };

  #[test]
  fn dispatch_bumps_revision_and_logout_clears() {
    let mut store = Store::new(chrono_tz::UTC);
    store.login(Session::local("me"));
    store.dispatch(patch_tasks(
      vec![Task {
        id:       Id::from("1"),
        name:     "read".to_string(),
        tag:      Id::none_tag(),
        date:     Utc::now(),
        complete: false,
        in_focus: false
      }],
      vec![],
      vec![]
    ));
    assert_eq!(store.revision(), 1);
    assert_eq!(store.state().tasks().len(), 1);

    store.logout();
    assert!(store.session().is_none());
    assert!(store.state().tasks().is_empty());
    assert_eq!(store.revision(), 2);
  }
}
