use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{Event, EventGroup, EventStore, Project, StoreError};

/// Reference store: an append-only event log plus a project registry,
/// both behind `parking_lot` locks. Good enough for a test harness and
/// for exercising the pipeline; a persistent backend only has to
/// implement the same `EventStore` contract.
#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<Vec<Event>>,
    projects: RwLock<HashMap<Uuid, Project>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn in_window(event: &Event, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        event.metric_time >= from && event.metric_time < to
    }
}

impl EventStore for MemoryStore {
    fn add_event(&self, event: Event) -> Result<(), StoreError> {
        self.events.write().push(event);
        Ok(())
    }

    fn query(
        &self,
        project_id: Uuid,
        metric_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, StoreError> {
        let mut matched: Vec<Event> = self
            .events
            .read()
            .iter()
            .filter(|ev| {
                ev.project_id == project_id
                    && ev.metric_name == metric_name
                    && Self::in_window(ev, from, to)
            })
            .cloned()
            .collect();
        // Stable sort keeps insertion order as the tie-break.
        matched.sort_by_key(|ev| ev.metric_time);
        Ok(matched)
    }

    fn all_events_grouped(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EventGroup>, StoreError> {
        let mut by_project: HashMap<Uuid, Vec<Event>> = HashMap::new();
        for ev in self.events.read().iter() {
            if Self::in_window(ev, from, to) {
                by_project.entry(ev.project_id).or_default().push(ev.clone());
            }
        }

        let mut groups: Vec<EventGroup> = by_project
            .into_iter()
            .map(|(project_id, mut events)| {
                events.sort_by_key(|ev| ev.metric_time);
                EventGroup { project_id, events }
            })
            .collect();
        groups.sort_by_key(|g| g.project_id);
        Ok(groups)
    }

    fn add_project(&self, title: &str) -> Result<Project, StoreError> {
        let mut projects = self.projects.write();
        if projects.values().any(|p| p.title == title) {
            return Err(StoreError::DuplicateProject(title.to_owned()));
        }
        let project = Project {
            id: Uuid::new_v4(),
            title: title.to_owned(),
        };
        projects.insert(project.id, project.clone());
        Ok(project)
    }

    fn project_by_title(&self, title: &str) -> Result<Option<Project>, StoreError> {
        Ok(self
            .projects
            .read()
            .values()
            .find(|p| p.title == title)
            .cloned())
    }

    fn project_title(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(self.projects.read().get(&id).map(|p| p.title.clone()))
    }
}
