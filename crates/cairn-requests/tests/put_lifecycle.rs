mod support;

use anyhow::{Context, Result};
use cairn_events::{Event, PersistenceMode};
use cairn_insert_core::{InsertError, InsertUri, RedirectDescriptor};
use cairn_requests::{PutSubmission, SubmitError, Upload};
use cairn_test_support::{
    InserterCall, InserterScript, ScriptedInserterFactory, eventually, put_params, ssk_uri,
};
use support::Harness;

fn direct(client: &str, identifier: &str, persistence: PersistenceMode, bytes: &[u8]) -> PutSubmission {
    PutSubmission {
        params: put_params(client, identifier, persistence),
        upload: Upload::Direct(bytes.to_vec()),
        content_type: None,
    }
}

fn final_uri() -> Result<InsertUri> {
    Ok(InsertUri::parse("CHK@generated,key")?)
}

#[tokio::test]
async fn direct_put_succeeds_and_notifies() -> Result<()> {
    let harness = Harness::new()?;
    let request = harness
        .service
        .submit(direct("alice", "doc-1", PersistenceMode::DurableVolatile, b"hello"))
        .await?;

    assert!(request.is_started());
    assert!(!request.is_finished());
    let inserter = harness.factory.last().context("inserter built")?;
    let reader = inserter.job().data.clone().context("direct data")?;
    assert_eq!(reader.read_all().await?, b"hello");

    assert!(inserter.succeed_latest(final_uri()?));
    let status = request.status();
    assert!(status.finished && status.succeeded);
    assert_eq!(status.final_uri.as_deref(), Some("CHK@generated,key"));
    assert_eq!(status.failure, None);

    assert!(eventually(|| harness.count_events("put_successful") == 1).await);
    assert!(eventually(|| harness.count_events("persistent_put") == 2).await);
    assert!(eventually(|| harness.metrics.snapshot().succeeded_total == 1).await);
    assert_eq!(harness.metrics.snapshot().active_requests, 1);
    Ok(())
}

#[tokio::test]
async fn connection_bound_requests_are_not_registered() -> Result<()> {
    let harness = Harness::new()?;
    let request = harness
        .service
        .submit(direct("alice", "doc-1", PersistenceMode::ConnectionBound, b"x"))
        .await?;

    assert!(harness.service.get(request.identity()).is_none());
    let inserter = harness.factory.last().context("inserter built")?;
    assert!(inserter.succeed_latest(final_uri()?));
    assert!(eventually(|| harness.count_events("put_successful") == 1).await);
    assert_eq!(harness.count_events("persistent_put"), 0);
    Ok(())
}

#[tokio::test]
async fn synchronous_start_failure_marks_request_failed() -> Result<()> {
    let factory = ScriptedInserterFactory::with_script(InserterScript {
        fail_start: Some(InsertError::internal("no route")),
        ..InserterScript::default()
    });
    let harness = Harness::with_factory(factory)?;
    let request = harness
        .service
        .submit(direct("alice", "doc-1", PersistenceMode::DurableVolatile, b"x"))
        .await?;

    let status = request.status();
    assert!(status.started);
    assert!(status.finished);
    assert!(!status.succeeded);
    assert_eq!(status.failure, Some(InsertError::internal("no route")));

    assert!(eventually(|| harness.count_events("put_failed") == 1).await);
    let fatal = harness.events().into_iter().find_map(|event| match event {
        Event::PutFailed { fatal, code, .. } => Some((fatal, code)),
        _ => None,
    });
    assert_eq!(fatal, Some((true, "internal".to_string())));
    assert!(eventually(|| harness.metrics.snapshot().failed_total == 1).await);
    Ok(())
}

#[tokio::test]
async fn stale_and_repeated_completions_are_ignored() -> Result<()> {
    let harness = Harness::new()?;
    let request = harness
        .service
        .submit(direct("alice", "doc-1", PersistenceMode::DurableVolatile, b"x"))
        .await?;
    let inserter = harness.factory.last().context("inserter built")?;

    assert!(inserter.fail_latest(InsertError::Network {
        detail: "route lost".into(),
        retryable: true,
    }));
    assert!(request.restart().await);

    request.on_success(1, final_uri()?);
    assert!(!request.is_finished(), "first attempt is superseded");

    assert!(inserter.succeed_latest(final_uri()?));
    assert!(request.has_succeeded());

    request.on_failure(2, InsertError::Cancelled);
    let status = request.status();
    assert!(status.succeeded, "second report for one attempt is dropped");
    assert_eq!(status.failure, None);
    Ok(())
}

#[tokio::test]
async fn restart_follows_failure() -> Result<()> {
    let harness = Harness::new()?;
    let request = harness
        .service
        .submit(direct("alice", "doc-1", PersistenceMode::DurableVolatile, b"x"))
        .await?;
    let inserter = harness.factory.last().context("inserter built")?;

    assert!(!request.can_restart(), "running requests cannot restart");
    assert!(inserter.fail_latest(InsertError::RetryLimitExceeded { attempts: 3 }));
    assert!(request.can_restart());

    assert_eq!(harness.service.restart(request.identity()).await, Some(true));
    let status = request.status();
    assert!(status.started);
    assert!(!status.finished);
    assert_eq!(status.failure, None);
    assert_eq!(inserter.calls(), vec![InserterCall::Start, InserterCall::Restart]);
    Ok(())
}

#[tokio::test]
async fn restart_is_refused_without_side_effects() -> Result<()> {
    let harness = Harness::new()?;
    let request = harness
        .service
        .submit(direct("alice", "doc-1", PersistenceMode::DurableVolatile, b"x"))
        .await?;
    let inserter = harness.factory.last().context("inserter built")?;

    inserter.set_restartable(false);
    assert!(inserter.fail_latest(InsertError::internal("corrupt")));
    let before = request.status();
    assert!(!request.can_restart());
    assert!(!request.restart().await);
    assert_eq!(request.status(), before);
    assert_eq!(inserter.calls(), vec![InserterCall::Start]);
    assert_eq!(inserter.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn succeeded_requests_cannot_restart() -> Result<()> {
    let harness = Harness::new()?;
    let request = harness
        .service
        .submit(direct("alice", "doc-1", PersistenceMode::DurableVolatile, b"x"))
        .await?;
    let inserter = harness.factory.last().context("inserter built")?;
    assert!(inserter.succeed_latest(final_uri()?));

    assert!(!request.can_restart());
    assert!(!request.restart().await);
    assert!(request.has_succeeded());
    Ok(())
}

#[tokio::test]
async fn synchronous_restart_failure_is_recorded() -> Result<()> {
    let harness = Harness::new()?;
    let request = harness
        .service
        .submit(direct("alice", "doc-1", PersistenceMode::DurableVolatile, b"x"))
        .await?;
    let inserter = harness.factory.last().context("inserter built")?;
    assert!(inserter.fail_latest(InsertError::Cancelled));

    inserter.fail_next_restart(InsertError::internal("exhausted"));
    assert!(!request.restart().await);
    let status = request.status();
    assert!(status.finished);
    assert_eq!(status.failure, Some(InsertError::internal("exhausted")));
    Ok(())
}

#[tokio::test]
async fn free_data_is_idempotent() -> Result<()> {
    let harness = Harness::new()?;
    let file = harness.root.join("notes.txt");
    std::fs::write(&file, b"twelve bytes")?;
    let request = harness
        .service
        .submit(PutSubmission {
            params: put_params("alice", "notes", PersistenceMode::DurableVolatile),
            upload: Upload::Disk(file.clone()),
            content_type: None,
        })
        .await?;

    assert_eq!(request.content_type(), Some("text/plain"));
    assert!(request.holds_data());
    request.free_data();
    request.free_data();
    assert!(!request.holds_data());
    assert_eq!(request.data_size(), 12);
    assert!(file.exists(), "caller-owned files are never deleted");
    Ok(())
}

#[tokio::test]
async fn redirect_carries_content_type_only_in_descriptor() -> Result<()> {
    let harness = Harness::new()?;
    let target = ssk_uri("site");
    let request = harness
        .service
        .submit(PutSubmission {
            params: put_params("alice", "link", PersistenceMode::DurableVolatile),
            upload: Upload::Redirect(target.clone()),
            content_type: Some("text/html".into()),
        })
        .await?;

    assert_eq!(request.content_type(), None);
    assert_eq!(request.target_uri(), Some(&target));
    let inserter = harness.factory.last().context("inserter built")?;
    assert!(inserter.job().is_metadata);
    assert_eq!(inserter.job().content_type, None);

    let bytes = inserter
        .job()
        .data
        .clone()
        .context("descriptor data")?
        .read_all()
        .await?;
    let descriptor = RedirectDescriptor::decode(&bytes)?;
    assert_eq!(descriptor.target, target.to_string());
    assert_eq!(descriptor.content_type.as_deref(), Some("text/html"));
    Ok(())
}

#[tokio::test]
async fn identifier_collision_is_rejected_and_releases_data() -> Result<()> {
    let harness = Harness::new()?;
    let first = harness
        .service
        .submit(direct("alice", "doc-1", PersistenceMode::DurableRebootPersistent, b"one"))
        .await?;
    assert_eq!(harness.temp_files(), 1);

    let second = harness
        .service
        .submit(direct("alice", "doc-1", PersistenceMode::DurableRebootPersistent, b"two"))
        .await;
    assert!(matches!(second, Err(SubmitError::Collision(_))));
    assert_eq!(harness.temp_files(), 1);
    assert!(first.holds_data());

    harness
        .service
        .submit(direct("bob", "doc-1", PersistenceMode::DurableRebootPersistent, b"three"))
        .await?;
    assert_eq!(harness.service.registry().len(), 2);
    assert_eq!(harness.service.list("alice").len(), 1);
    Ok(())
}

#[tokio::test]
async fn global_requests_are_listed_separately() -> Result<()> {
    let harness = Harness::new()?;
    let mut params = put_params("alice", "shared", PersistenceMode::DurableVolatile);
    params.global = true;
    harness
        .service
        .submit(PutSubmission {
            params,
            upload: Upload::Direct(b"x".to_vec()),
            content_type: None,
        })
        .await?;
    harness
        .service
        .submit(direct("alice", "private", PersistenceMode::DurableVolatile, b"y"))
        .await?;

    let global = harness.service.registry().list_global();
    assert_eq!(global.len(), 1);
    assert_eq!(global[0].identity().identifier, "shared");
    Ok(())
}
