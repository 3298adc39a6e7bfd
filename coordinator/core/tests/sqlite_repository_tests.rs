// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use berth_core::domain::agent::{Agent, AgentId};
use berth_core::domain::identity::ServiceIdentity;
use berth_core::domain::lock::{AcquireResult, Lock, OwnedUpdate};
use berth_core::domain::message::NewMessage;
use berth_core::domain::repository::*;
use berth_core::domain::salvage::{NewSalvageEntry, SalvageStatus, SalvageTransition, TransitionResult};
use berth_core::domain::service::{Endpoint, RestartPolicy, Service, ServiceStatus};
use berth_core::domain::session::Session;
use berth_core::infrastructure::db::Database;
use berth_core::infrastructure::repositories::*;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

const NOW: i64 = 1_700_000_000_000;

async fn db() -> Database {
    let db = Database::in_memory().await.unwrap();
    db.migrate().await.unwrap();
    db
}

fn service(id: &str, port: u16) -> Service {
    Service {
        id: ServiceIdentity::parse(id).unwrap(),
        port,
        pid: None,
        cmd: Some("npm run dev".to_string()),
        cwd: None,
        status: ServiceStatus::Assigned,
        created_at: NOW,
        last_seen: NOW,
        expires_at: None,
        restart_policy: RestartPolicy::Never,
        paired_with: None,
        metadata: Some(json!({ "framework": "next" })),
    }
}

fn agent_id(id: &str) -> AgentId {
    AgentId::parse(id).unwrap()
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let db = db().await;
    assert_ok!(db.migrate().await);
    let (applied, available) = db.migration_status().await.unwrap();
    assert_eq!(applied, available);
    assert!(available >= 3);
}

#[tokio::test]
async fn test_service_unique_port_and_id() {
    let db = db().await;
    let repo = SqliteServiceRepository::new(db.get_pool().clone());

    assert_ok!(repo.insert(&service("shop:api", 3100)).await);

    let err = repo.insert(&service("shop:web", 3100)).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Conflict(_)));
    let err = repo.insert(&service("shop:api", 3101)).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Conflict(_)));

    let found = repo.find_by_port(3100).await.unwrap().unwrap();
    assert_eq!(found.id.as_str(), "shop:api");
    assert_eq!(found.metadata, Some(json!({ "framework": "next" })));
    assert_eq!(repo.ports_in_use().await.unwrap(), vec![3100]);
}

#[tokio::test]
async fn test_endpoints_cascade_with_service() {
    let db = db().await;
    let repo = SqliteServiceRepository::new(db.get_pool().clone());
    repo.insert(&service("app", 4000)).await.unwrap();

    let endpoint = Endpoint {
        service_id: ServiceIdentity::parse("app").unwrap(),
        env: "dev".to_string(),
        url: "http://localhost:4000".to_string(),
    };
    assert_ok!(repo.upsert_endpoint(&endpoint).await);

    let orphan = Endpoint {
        service_id: ServiceIdentity::parse("missing").unwrap(),
        ..endpoint.clone()
    };
    assert!(matches!(
        repo.upsert_endpoint(&orphan).await,
        Err(RepositoryError::NotFound(_))
    ));

    let released = repo.delete_many(&[endpoint.service_id.clone()]).await.unwrap();
    assert_eq!(released.len(), 1);
    assert!(repo.endpoints_for(&endpoint.service_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_service_expiry_and_status() {
    let db = db().await;
    let repo = SqliteServiceRepository::new(db.get_pool().clone());

    let mut temp = service("temp", 5000);
    temp.expires_at = Some(NOW + 1_000);
    repo.insert(&temp).await.unwrap();
    repo.insert(&service("keep", 5001)).await.unwrap();

    let updated = repo
        .update_status(&ServiceIdentity::parse("keep").unwrap(), ServiceStatus::Running, Some(77), NOW + 5)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, ServiceStatus::Running);
    assert_eq!(updated.pid, Some(77));
    assert_eq!(updated.last_seen, NOW + 5);

    assert!(repo.delete_expired(NOW + 999).await.unwrap().is_empty());
    let expired = repo.delete_expired(NOW + 1_000).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].port, 5000);
}

#[tokio::test]
async fn test_lock_acquire_is_conditional() {
    let db = db().await;
    let repo = SqliteLockRepository::new(db.get_pool().clone());

    let lock = |owner: &str, at: i64, ttl: i64| Lock {
        name: "build".to_string(),
        owner: owner.to_string(),
        acquired_at: at,
        expires_at: at + ttl,
        metadata: None,
    };

    assert!(matches!(
        repo.acquire(&lock("a", NOW, 1_000), NOW).await.unwrap(),
        AcquireResult::Acquired(_)
    ));
    match repo.acquire(&lock("b", NOW + 10, 1_000), NOW + 10).await.unwrap() {
        AcquireResult::Held(holder) => assert_eq!(holder.owner, "a"),
        other => panic!("expected Held, got {:?}", other),
    }

    // re-entrant keeps acquired_at
    match repo.acquire(&lock("a", NOW + 500, 1_000), NOW + 500).await.unwrap() {
        AcquireResult::Acquired(l) => {
            assert_eq!(l.acquired_at, NOW);
            assert_eq!(l.expires_at, NOW + 1_500);
        }
        other => panic!("expected Acquired, got {:?}", other),
    }

    // after expiry a new owner takes over
    match repo.acquire(&lock("b", NOW + 1_500, 1_000), NOW + 1_500).await.unwrap() {
        AcquireResult::Acquired(l) => {
            assert_eq!(l.owner, "b");
            assert_eq!(l.acquired_at, NOW + 1_500);
        }
        other => panic!("expected Acquired, got {:?}", other),
    }
}

#[tokio::test]
async fn test_lock_release_and_extend_check_owner() {
    let db = db().await;
    let repo = SqliteLockRepository::new(db.get_pool().clone());
    repo.acquire(
        &Lock {
            name: "deploy".to_string(),
            owner: "a".to_string(),
            acquired_at: NOW,
            expires_at: NOW + 10_000,
            metadata: Some(json!({ "env": "staging" })),
        },
        NOW,
    )
    .await
    .unwrap();

    assert!(matches!(
        repo.extend("deploy", "b", NOW + 20_000, NOW).await.unwrap(),
        OwnedUpdate::NotOwner(_)
    ));
    assert!(matches!(
        repo.extend("deploy", "a", NOW + 20_000, NOW).await.unwrap(),
        OwnedUpdate::Applied(_)
    ));
    assert!(matches!(
        repo.release("deploy", Some("b"), NOW).await.unwrap(),
        OwnedUpdate::NotOwner(_)
    ));
    assert_eq!(repo.list(Some("a"), NOW).await.unwrap().len(), 1);
    assert!(matches!(
        repo.release("deploy", None, NOW).await.unwrap(),
        OwnedUpdate::Applied(_)
    ));
    assert!(matches!(
        repo.release("deploy", None, NOW).await.unwrap(),
        OwnedUpdate::Missing
    ));
}

#[tokio::test]
async fn test_message_log_ordering_and_expiry() {
    let db = db().await;
    let repo = SqliteMessageRepository::new(db.get_pool().clone());

    let mut ids = Vec::new();
    for i in 0..5 {
        let msg = repo
            .append(&NewMessage {
                channel: "builds".to_string(),
                payload: json!({ "step": i }),
                sender: Some("ci".to_string()),
                created_at: NOW + i,
                expires_at: if i == 0 { Some(NOW + 100) } else { None },
            })
            .await
            .unwrap();
        ids.push(msg.id);
    }
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let after = repo.list("builds", Some(ids[1]), 10, NOW).await.unwrap();
    assert_eq!(after.iter().map(|m| m.id).collect::<Vec<_>>(), ids[2..].to_vec());

    let visible = repo.list("builds", None, 10, NOW + 100).await.unwrap();
    assert_eq!(visible.len(), 4);
    assert_eq!(repo.delete_expired(NOW + 100).await.unwrap(), 1);

    let summary = repo.channels(NOW + 100).await.unwrap();
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].count, 4);
    assert_eq!(summary[0].last_id, ids[4]);

    assert_eq!(repo.clear("builds").await.unwrap(), 4);
}

#[tokio::test]
async fn test_agent_upsert_keeps_registration_time() {
    let db = db().await;
    let repo = SqliteAgentRepository::new(db.get_pool().clone());

    let mut agent = Agent {
        id: agent_id("claude-1"),
        name: Some("Builder".to_string()),
        agent_type: Some("coder".to_string()),
        purpose: None,
        project: Some("shop".to_string()),
        registered_at: NOW,
        last_heartbeat: NOW,
        max_services: Some(3),
        max_locks: None,
        metadata: None,
    };
    repo.upsert(&agent).await.unwrap();

    agent.registered_at = NOW + 50;
    agent.last_heartbeat = NOW + 50;
    let stored = repo.upsert(&agent).await.unwrap();
    assert_eq!(stored.registered_at, NOW);
    assert_eq!(stored.last_heartbeat, NOW + 50);

    assert!(repo.touch(&agent_id("ghost"), NOW).await.unwrap().is_none());
    assert_eq!(repo.list_silent_since(NOW + 49).await.unwrap().len(), 0);
    assert_eq!(repo.list_silent_since(NOW + 50).await.unwrap().len(), 1);
    assert!(repo.delete(&agent.id).await.unwrap());
    assert!(!repo.delete(&agent.id).await.unwrap());
}

#[tokio::test]
async fn test_sessions_round_trip_notes_and_files() {
    let db = db().await;
    let repo = SqliteSessionRepository::new(db.get_pool().clone());

    let mut session = Session {
        id: "s1".to_string(),
        agent_id: agent_id("a"),
        project: Some("shop".to_string()),
        purpose: Some("fix checkout".to_string()),
        notes: vec!["first".to_string(), "second".to_string()],
        claimed_files: vec!["src/cart.rs".to_string()],
        active: true,
        started_at: NOW,
    };
    repo.save(&session).await.unwrap();

    session.notes.push("third".to_string());
    repo.save(&session).await.unwrap();

    let loaded = repo.active_for_agent(&agent_id("a")).await.unwrap();
    assert_eq!(loaded, vec![session.clone()]);

    session.active = false;
    repo.save(&session).await.unwrap();
    assert!(repo.active_for_agent(&agent_id("a")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_salvage_is_materialised_once() {
    let db = db().await;
    let repo = SqliteSalvageRepository::new(db.get_pool().clone());

    let session = Session {
        id: "s1".to_string(),
        agent_id: agent_id("dead"),
        project: Some("shop".to_string()),
        purpose: None,
        notes: vec!["wip".to_string()],
        claimed_files: vec![],
        active: true,
        started_at: NOW,
    };
    let entry = NewSalvageEntry::from_session(&session, NOW);

    let created = repo.insert_if_absent(&entry).await.unwrap();
    assert!(created.is_some());
    assert!(repo.insert_if_absent(&entry).await.unwrap().is_none());

    // a different session of the same agent while one is live
    let other = NewSalvageEntry {
        session_id: "s2".to_string(),
        ..entry.clone()
    };
    assert!(repo.insert_if_absent(&other).await.unwrap().is_none());

    let live = repo.find_live(&agent_id("dead")).await.unwrap().unwrap();
    assert_eq!(live.status, SalvageStatus::Queued);
    assert_eq!(live.context.notes, vec!["wip"]);
    assert_eq!(repo.list(Some("shop"), false).await.unwrap().len(), 1);
    assert!(repo.list(Some("blog"), true).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_salvage_transitions_are_conditional() {
    let db = db().await;
    let repo = SqliteSalvageRepository::new(db.get_pool().clone());
    let dead = agent_id("dead");

    repo.insert_if_absent(&NewSalvageEntry {
        agent_id: dead.clone(),
        session_id: "s1".to_string(),
        project: None,
        context: Default::default(),
        created_at: NOW,
    })
    .await
    .unwrap();

    let claim = |by: &str| SalvageTransition::Claim { by: agent_id(by) };

    assert!(matches!(
        repo.transition(&dead, &claim("r1"), None, NOW + 1).await.unwrap(),
        TransitionResult::Applied(_)
    ));
    match repo.transition(&dead, &claim("r2"), None, NOW + 2).await.unwrap() {
        TransitionResult::WrongStatus(e) => assert_eq!(e.claimed_by, Some(agent_id("r1"))),
        other => panic!("expected WrongStatus, got {:?}", other),
    }
    assert!(matches!(
        repo.transition(&dead, &SalvageTransition::Complete, Some(&agent_id("r2")), NOW + 3)
            .await
            .unwrap(),
        TransitionResult::WrongStatus(_)
    ));

    match repo.transition(&dead, &SalvageTransition::Abandon, Some(&agent_id("r1")), NOW + 4).await.unwrap() {
        TransitionResult::Applied(e) => {
            assert_eq!(e.status, SalvageStatus::Queued);
            assert_eq!(e.claimed_by, None);
            assert_eq!(e.updated_at, NOW + 4);
        }
        other => panic!("expected Applied, got {:?}", other),
    }

    assert!(matches!(
        repo.transition(&dead, &SalvageTransition::Dismiss, None, NOW + 5).await.unwrap(),
        TransitionResult::Applied(_)
    ));
    assert!(matches!(
        repo.transition(&dead, &SalvageTransition::Dismiss, None, NOW + 6).await.unwrap(),
        TransitionResult::Missing
    ));
}

#[tokio::test]
async fn test_file_database_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("berth.db");

    {
        let db = Database::connect(&path).await.unwrap();
        db.migrate().await.unwrap();
        let repo = SqliteServiceRepository::new(db.get_pool().clone());
        repo.insert(&service("persist:me", 6000)).await.unwrap();
        db.close().await;
    }

    let db = Database::connect(&path).await.unwrap();
    assert_ok!(db.migrate().await);
    let repo = SqliteServiceRepository::new(db.get_pool().clone());
    let found = repo
        .find_by_id(&ServiceIdentity::parse("persist:me").unwrap())
        .await
        .unwrap();
    assert_eq!(found.map(|s| s.port), Some(6000));
    assert_err!(repo.insert(&service("other", 6000)).await);
}
