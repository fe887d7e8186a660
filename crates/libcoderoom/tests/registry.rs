use std::sync::Arc;

use coderoom_protocol::{Node, ServerMessage};
use libcoderoom::{LeaveOutcome, SessionRegistry, TreeOp};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn join_racing_last_leave_never_revives_session() {
    for _ in 0..50 {
        let registry = Arc::new(SessionRegistry::default());
        let id = registry.create_session();
        let first = registry.join(&id, "first").await.expect("join session");

        let leaver = {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            let pid = first.participant.id.clone();
            tokio::spawn(async move { registry.leave(&id, &pid).await })
        };
        let joiner = {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            tokio::spawn(async move { registry.join(&id, "late").await })
        };

        let left = leaver.await.expect("leaver").expect("leave session");
        match joiner.await.expect("joiner") {
            // Join won: the session survives with the late joiner only.
            Ok(joined) => {
                assert_eq!(left, LeaveOutcome::Left { remaining: 1 });
                assert!(registry.session_exists(&id));
                let info = registry.session_info(&id).await.expect("session info");
                assert_eq!(info.participants, vec![joined.participant]);
            }
            // Leave won: the session is gone for good.
            Err(err) => {
                assert!(err.is_not_found());
                assert_eq!(left, LeaveOutcome::Destroyed);
                assert!(!registry.session_exists(&id));
            }
        }
    }
}

#[tokio::test]
async fn join_after_last_leave_is_not_found() {
    let registry = SessionRegistry::default();
    let id = registry.create_session();
    let only = registry.join(&id, "solo").await.expect("join session");
    assert_eq!(
        registry.leave(&id, &only.participant.id).await.expect("leave session"),
        LeaveOutcome::Destroyed
    );
    assert!(registry.join(&id, "again").await.unwrap_err().is_not_found());
    assert_eq!(registry.session_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_editors_converge_on_last_applied_content() {
    let registry = Arc::new(SessionRegistry::default());
    let id = registry.create_session();
    let mut observer = registry.join(&id, "observer").await.expect("join session");
    let a = registry.join(&id, "a").await.expect("join session");
    let b = registry.join(&id, "b").await.expect("join session");

    let mut tasks = Vec::new();
    for (who, pid) in [("a", a.participant.id.clone()), ("b", b.participant.id.clone())] {
        let registry = Arc::clone(&registry);
        let id = id.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..20 {
                registry
                    .apply(
                        &id,
                        &pid,
                        TreeOp::UpdateContent {
                            path: "main.js".into(),
                            content: format!("{who}-{i}"),
                        },
                    )
                    .await
                    .expect("apply op");
            }
        }));
    }
    for task in tasks {
        task.await.expect("task");
    }

    // The observer sees every edit in apply order; the last one must match
    // the stored content.
    let mut last_seen = None;
    let mut edits = 0;
    while let Some(message) = observer.subscription.try_recv() {
        if let ServerMessage::ContentUpdated { content, .. } = message.as_ref() {
            edits += 1;
            last_seen = Some(content.clone());
        }
    }
    assert_eq!(edits, 40);

    let session = registry.get_session(&id).expect("session exists");
    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(
        snapshot.get("main.js").and_then(Node::content),
        last_seen.as_deref()
    );
}

#[tokio::test]
async fn joiner_snapshot_and_stream_have_no_gap() {
    let registry = Arc::new(SessionRegistry::default());
    let id = registry.create_session();
    let writer = registry.join(&id, "writer").await.expect("join session");

    let producer = {
        let registry = Arc::clone(&registry);
        let id = id.clone();
        let pid = writer.participant.id.clone();
        tokio::spawn(async move {
            for i in 0..30 {
                registry
                    .apply(
                        &id,
                        &pid,
                        TreeOp::CreateFile {
                            path: format!("f{i}.txt"),
                            content: String::new(),
                        },
                    )
                    .await
                    .expect("apply op");
                tokio::task::yield_now().await;
            }
        })
    };

    tokio::task::yield_now().await;
    let mut reader = registry.join(&id, "reader").await.expect("join session");
    producer.await.expect("producer");

    let mut seen: Vec<String> = reader
        .snapshot
        .keys()
        .filter(|p| p.starts_with('f'))
        .cloned()
        .collect();
    while let Some(message) = reader.subscription.try_recv() {
        if let ServerMessage::ItemCreated { path, .. } = message.as_ref() {
            assert!(!seen.contains(path), "duplicate event for {path}");
            seen.push(path.clone());
        }
    }
    seen.sort();
    let mut expected: Vec<String> = (0..30).map(|i| format!("f{i}.txt")).collect();
    expected.sort();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn sessions_are_isolated() {
    let registry = SessionRegistry::default();
    let one = registry.create_session();
    let two = registry.create_session();
    assert_ne!(one, two);

    let a = registry.join(&one, "a").await.expect("join session");
    let mut b = registry.join(&two, "b").await.expect("join session");
    registry
        .apply(
            &one,
            &a.participant.id,
            TreeOp::CreateFolder { path: "docs".into() },
        )
        .await
        .expect("apply op");

    assert!(b.subscription.try_recv().is_none());
    assert!(
        registry
            .get_session(&two)
            .expect("session exists")
            .snapshot()
            .await
            .expect("snapshot")
            .get("docs")
            .is_none()
    );
}
