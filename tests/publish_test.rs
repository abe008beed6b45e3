//! Tests for the publishing walk and the destination conflict contract.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use corpus_migrator::model::{AttachmentRef, Author, ContentNode};
use corpus_migrator::publish::{
    CreateOutcome, DestId, Destination, HttpDestination, NodeDraft, NodePatch, PublishError,
    Publisher,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Create {
        source_id: String,
        parent: Option<String>,
        updated_at_set: bool,
        urls: Vec<String>,
    },
    Edit {
        id: String,
        author_name: String,
    },
}

/// In-memory destination that records every call.
#[derive(Default)]
struct RecordingDestination {
    conflict_ids: HashSet<String>,
    events: Mutex<Vec<Event>>,
    next_id: AtomicUsize,
}

impl RecordingDestination {
    fn with_conflicts(ids: &[&str]) -> Self {
        Self {
            conflict_ids: ids.iter().map(|&i| i.to_string()).collect(),
            ..Self::default()
        }
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn created_source_ids(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Create { source_id, .. } => Some(source_id),
                Event::Edit { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl Destination for RecordingDestination {
    async fn create_node(
        &self,
        parent: Option<&DestId>,
        draft: &NodeDraft,
    ) -> Result<CreateOutcome, PublishError> {
        if self.conflict_ids.contains(&draft.source_id) {
            return Ok(CreateOutcome::Conflict);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.events.lock().unwrap().push(Event::Create {
            source_id: draft.source_id.clone(),
            parent: parent.map(|p| p.0.clone()),
            updated_at_set: draft.updated_at.is_some(),
            urls: draft.attachments.iter().map(|a| a.url.clone()).collect(),
        });
        Ok(CreateOutcome::Created(DestId(id.to_string())))
    }

    async fn edit_node(&self, id: &DestId, patch: &NodePatch) -> Result<(), PublishError> {
        self.events.lock().unwrap().push(Event::Edit {
            id: id.0.clone(),
            author_name: patch.author_name.clone(),
        });
        Ok(())
    }

    async fn publish_blob(&self, local: &Path) -> Result<String, PublishError> {
        let name = local.file_name().unwrap().to_string_lossy();
        Ok(format!("https://dest.test/media/{name}"))
    }
}

fn node(id: &str, children: Option<Vec<ContentNode>>) -> ContentNode {
    let at = Utc.with_ymd_and_hms(2016, 5, 1, 12, 0, 0).unwrap();
    ContentNode {
        id: id.to_string(),
        author: Author {
            id: "u1".to_string(),
            name: "Dana".to_string(),
        },
        created_at: at,
        updated_at: at,
        message: format!("message of {id}"),
        attachments: Vec::new(),
        children,
    }
}

#[tokio::test]
async fn conflict_skips_the_node_and_its_subtree() {
    let r1 = node("r1", Some(Vec::new()));
    let r2 = node("r2", Some(Vec::new()));
    let c1 = node("c1", Some(vec![r1]));
    let c2 = node("c2", Some(vec![r2]));
    let root = node("p1", Some(vec![c1, c2]));

    let dest = RecordingDestination::with_conflicts(&["c1"]);
    let publisher = Publisher::new(&dest, false);
    let summary = publisher.publish_tree(&root).await.unwrap();

    assert_eq!(summary.created, 3);
    assert_eq!(summary.conflicts, 1);
    // c1's reply was captured by the destination when it first accepted c1;
    // it is not re-attempted now.
    assert_eq!(dest.created_source_ids(), ["p1", "c2", "r2"]);
}

#[tokio::test]
async fn conflicting_root_skips_the_whole_tree() {
    let root = node("p1", Some(vec![node("c1", Some(Vec::new()))]));

    let dest = RecordingDestination::with_conflicts(&["p1"]);
    let publisher = Publisher::new(&dest, false);
    let summary = publisher.publish_tree(&root).await.unwrap();

    assert_eq!(summary.created, 0);
    assert_eq!(summary.conflicts, 1);
    assert!(dest.events().is_empty());
}

#[tokio::test]
async fn author_attribution_is_edited_in_right_after_each_create() {
    let root = node("p1", Some(vec![node("c1", Some(Vec::new()))]));

    let dest = RecordingDestination::default();
    let publisher = Publisher::new(&dest, false);
    publisher.publish_tree(&root).await.unwrap();

    let events = dest.events();
    assert_eq!(events.len(), 4);
    assert!(matches!(&events[0], Event::Create { source_id, parent: None, .. } if source_id == "p1"));
    assert!(
        matches!(&events[1], Event::Edit { id, author_name } if id == "1" && author_name == "Dana")
    );
    assert!(
        matches!(&events[2], Event::Create { source_id, parent: Some(p), .. } if source_id == "c1" && p == "1")
    );
    assert!(matches!(&events[3], Event::Edit { id, .. } if id == "2"));
}

#[tokio::test]
async fn updated_at_is_forwarded_only_for_edited_nodes() {
    let mut edited = node("c1", Some(Vec::new()));
    edited.updated_at = Utc.with_ymd_and_hms(2016, 6, 1, 12, 0, 0).unwrap();
    let root = node("p1", Some(vec![edited]));

    let dest = RecordingDestination::default();
    let publisher = Publisher::new(&dest, false);
    publisher.publish_tree(&root).await.unwrap();

    let flags: Vec<(String, bool)> = dest
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Create {
                source_id,
                updated_at_set,
                ..
            } => Some((source_id, updated_at_set)),
            Event::Edit { .. } => None,
        })
        .collect();
    assert_eq!(
        flags,
        [("p1".to_string(), false), ("c1".to_string(), true)]
    );
}

#[tokio::test]
async fn resolved_media_is_republished_when_enabled() {
    let mut root = node("p1", Some(Vec::new()));
    root.attachments.push(AttachmentRef::Picture {
        remote_url: "https://cdn.source.test/pic.jpg".to_string(),
        local_handle: Some(PathBuf::from("/data/media/p1/pic_0a1b2c3d.jpg")),
    });

    let dest = RecordingDestination::default();
    let publisher = Publisher::new(&dest, true);
    publisher.publish_tree(&root).await.unwrap();

    let events = dest.events();
    assert!(matches!(
        &events[0],
        Event::Create { urls, .. } if urls == &["https://dest.test/media/pic_0a1b2c3d.jpg"]
    ));
}

#[tokio::test]
async fn media_upload_disabled_falls_back_to_remote_urls() {
    let mut root = node("p1", Some(Vec::new()));
    root.attachments.push(AttachmentRef::Picture {
        remote_url: "https://cdn.source.test/pic.jpg".to_string(),
        local_handle: Some(PathBuf::from("/data/media/p1/pic_0a1b2c3d.jpg")),
    });

    let dest = RecordingDestination::default();
    let publisher = Publisher::new(&dest, false);
    publisher.publish_tree(&root).await.unwrap();

    let events = dest.events();
    assert!(matches!(
        &events[0],
        Event::Create { urls, .. } if urls == &["https://cdn.source.test/pic.jpg"]
    ));
}

#[tokio::test]
async fn http_destination_treats_conflict_status_as_skip() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/nodes"))
        .and(body_partial_json(json!({"parent": null})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "10"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/nodes/10"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/nodes"))
        .and(body_partial_json(json!({"parent": "10"})))
        .respond_with(ResponseTemplate::new(409).set_body_string("duplicate comment"))
        .expect(1)
        .mount(&server)
        .await;

    let root = node("p1", Some(vec![node("c1", Some(Vec::new()))]));
    let dest = HttpDestination::new(&server.uri(), "dest-token", Duration::from_secs(5)).unwrap();
    let publisher = Publisher::new(&dest, false);

    let summary = publisher.publish_tree(&root).await.unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(summary.conflicts, 1);
}

#[tokio::test]
async fn http_destination_surfaces_other_failures() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/nodes"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let root = node("p1", Some(Vec::new()));
    let dest = HttpDestination::new(&server.uri(), "dest-token", Duration::from_secs(5)).unwrap();
    let publisher = Publisher::new(&dest, false);

    assert!(publisher.publish_tree(&root).await.is_err());
}
