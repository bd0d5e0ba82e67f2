use std::future::Future;

use mediagen_contracts::{ExecutionResult, GenerationError, InterfaceMode, JobStatus};
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::PollOptions;
use crate::platforms::{JobHandle, JobProtocol, ModelBundle};
use crate::transport::HttpTransport;

use super::{ensure_mode, remote_failure, send, InvocationContext, ModelInstance};

enum Phase {
    Submitting,
    Polling {
        handle: JobHandle,
        attempt: u32,
        since: Instant,
    },
    Collecting {
        handle: JobHandle,
        status_payload: Value,
        since: Instant,
    },
}

/// Submit, then poll the job's status URL every `poll.interval` until the
/// vendor reports a terminal state.
///
/// Every poll is preceded by a sleep, so a job is never polled before one
/// interval has passed. A job that is still running once `poll.max_wait`
/// has elapsed fails with `Timeout`, and so does a status or result call
/// still in flight at that point.
pub async fn execute_async(
    instance: &ModelInstance,
    transport: &dyn HttpTransport,
    params: &Map<String, Value>,
    ctx: &InvocationContext,
    poll: PollOptions,
) -> Result<ExecutionResult, GenerationError> {
    let model = instance.model();
    ensure_mode(model, InterfaceMode::Async)?;
    if ctx.cancel.is_cancelled() {
        return Err(GenerationError::Canceled { job_id: None });
    }
    instance.ensure_credentials().await?;

    let mut phase = Phase::Submitting;
    loop {
        phase = match phase {
            Phase::Submitting => {
                let descriptor = model.build_request(params)?;
                debug!(
                    invocation_id = %ctx.id,
                    fingerprint = %descriptor.fingerprint(),
                    endpoint = %descriptor.endpoint,
                    "async request built"
                );
                let (submission, _) =
                    send(instance, transport, model.submit_call(&descriptor), ctx, None).await?;
                let handle = model.job_handle(&submission).ok_or_else(|| {
                    GenerationError::protocol(
                        model.platform(),
                        "submission response carried no job id",
                    )
                })?;
                info!(
                    invocation_id = %ctx.id,
                    job_id = %handle.id,
                    status_url = %handle.status_url,
                    "job submitted"
                );
                ctx.emit(
                    "job_submitted",
                    json!({"job_id": handle.id, "status_url": handle.status_url}),
                )
                .await;
                Phase::Polling {
                    handle,
                    attempt: 0,
                    since: Instant::now(),
                }
            }
            Phase::Polling {
                handle,
                attempt,
                since,
            } => {
                wait_interval(ctx, &poll, &handle).await?;
                let attempt = attempt + 1;
                let (payload, call) = within_deadline(
                    &poll,
                    since,
                    &handle.id,
                    send(
                        instance,
                        transport,
                        model.poll_call(&handle),
                        ctx,
                        Some(handle.id.as_str()),
                    ),
                )
                .await?;
                let status = model.classify(&payload).ok_or_else(|| {
                    GenerationError::protocol(
                        model.platform(),
                        format!(
                            "unrecognized job status {} for job {}",
                            payload.get("status").unwrap_or(&Value::Null),
                            handle.id
                        ),
                    )
                })?;
                debug!(
                    invocation_id = %ctx.id,
                    job_id = %handle.id,
                    attempt,
                    status = %status,
                    "job polled"
                );
                ctx.emit(
                    "job_polled",
                    json!({"job_id": handle.id, "attempt": attempt, "status": status}),
                )
                .await;

                match status {
                    JobStatus::InProgress => {
                        let waited = since.elapsed();
                        if poll.max_wait.is_some_and(|limit| waited >= limit) {
                            return Err(GenerationError::Timeout {
                                job_id: handle.id,
                                waited,
                            });
                        }
                        Phase::Polling {
                            handle,
                            attempt,
                            since,
                        }
                    }
                    JobStatus::Succeeded => Phase::Collecting {
                        handle,
                        status_payload: payload,
                        since,
                    },
                    JobStatus::Failed | JobStatus::Canceled => {
                        return Err(remote_failure(model.failure_message(&payload), &call));
                    }
                }
            }
            Phase::Collecting {
                handle,
                status_payload,
                since,
            } => {
                let payload = match model.result_call(&handle) {
                    Some(call) => {
                        let fetch = send(instance, transport, call, ctx, Some(handle.id.as_str()));
                        within_deadline(&poll, since, &handle.id, fetch).await?.0
                    }
                    None => status_payload,
                };
                let mut result = model.normalize_async(&payload);
                result.status = JobStatus::Succeeded;
                if result.prediction_id.is_none() {
                    result.prediction_id = Some(handle.id);
                }
                return Ok(result);
            }
        };
    }
}

/// Cuts `call` off once `poll.max_wait` has passed since polling began.
async fn within_deadline<T>(
    poll: &PollOptions,
    since: Instant,
    job_id: &str,
    call: impl Future<Output = Result<T, GenerationError>>,
) -> Result<T, GenerationError> {
    let Some(limit) = poll.max_wait else {
        return call.await;
    };
    tokio::time::timeout_at(since + limit, call)
        .await
        .unwrap_or_else(|_| {
            Err(GenerationError::Timeout {
                job_id: job_id.to_string(),
                waited: since.elapsed(),
            })
        })
}

async fn wait_interval(
    ctx: &InvocationContext,
    poll: &PollOptions,
    handle: &JobHandle,
) -> Result<(), GenerationError> {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(GenerationError::Canceled {
            job_id: Some(handle.id.clone()),
        }),
        _ = tokio::time::sleep(poll.interval) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mediagen_contracts::{ErrorKind, GenerationError, JobStatus, PlatformId};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::config::PollOptions;
    use crate::execution::InvocationContext;
    use crate::testing::{instance, params, ScriptedTransport};

    use super::execute_async;

    fn every_two_seconds() -> PollOptions {
        PollOptions {
            interval: Duration::from_secs(2),
            max_wait: None,
        }
    }

    fn replicate(status: &str) -> serde_json::Value {
        json!({
            "id": "abc",
            "status": status,
            "urls": {"get": "https://api.replicate.com/v1/predictions/abc"},
            "output": null,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_success_with_interval_gaps() {
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::json(201, replicate("starting")),
            ScriptedTransport::json(200, replicate("processing")),
            ScriptedTransport::json(200, replicate("processing")),
            ScriptedTransport::json(
                200,
                json!({
                    "id": "abc",
                    "status": "succeeded",
                    "output": ["https://replicate.delivery/fox.webp"],
                    "metrics": {"predict_time": 1.2},
                }),
            ),
        ]);
        let instance = instance(PlatformId::Replicate, "flux-schnell", json!({"api_key": "r8"}));
        let ctx = InvocationContext::new(CancellationToken::new());
        let result = execute_async(
            &instance,
            &transport,
            &params(json!({"prompt": "a red fox"})),
            &ctx,
            every_two_seconds(),
        )
        .await
        .unwrap();

        assert_eq!(result.status, JobStatus::Succeeded);
        assert_eq!(result.prediction_id.as_deref(), Some("abc"));
        assert_eq!(result.output_urls, vec!["https://replicate.delivery/fox.webp"]);
        assert_eq!(result.diagnostics["metrics"], json!({"predict_time": 1.2}));

        let calls = transport.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[1..]
            .iter()
            .all(|call| call.url == "https://api.replicate.com/v1/predictions/abc"));
        let times = transport.call_times();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn submission_without_job_id_is_protocol_error() {
        let transport = ScriptedTransport::new(vec![ScriptedTransport::json(
            201,
            json!({"status": "starting"}),
        )]);
        let instance = instance(PlatformId::Replicate, "sdxl", json!({"api_key": "r8"}));
        let ctx = InvocationContext::new(CancellationToken::new());
        let err = execute_async(
            &instance,
            &transport,
            &params(json!({"prompt": "fox"})),
            &ctx,
            every_two_seconds(),
        )
        .await
        .err();
        assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::Protocol));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn vendor_failure_stops_polling() {
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::json(201, replicate("starting")),
            ScriptedTransport::json(200, replicate("processing")),
            ScriptedTransport::json(
                200,
                json!({"id": "abc", "status": "failed", "error": "CUDA out of memory"}),
            ),
            ScriptedTransport::json(200, replicate("processing")),
        ]);
        let instance = instance(PlatformId::Replicate, "sdxl", json!({"api_key": "r8"}));
        let ctx = InvocationContext::new(CancellationToken::new());
        let err = execute_async(
            &instance,
            &transport,
            &params(json!({"prompt": "fox"})),
            &ctx,
            every_two_seconds(),
        )
        .await
        .err();
        let Some(GenerationError::Remote { message, .. }) = err else {
            panic!("expected remote error");
        };
        assert_eq!(message, "CUDA out of memory");
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unrecognized_status_is_protocol_error() {
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::json(200, json!({"task_id": "t-1", "status": "queued"})),
            ScriptedTransport::json(200, json!({"task_id": "t-1", "status": "hibernating"})),
        ]);
        let instance = instance(PlatformId::Genbo, "genbo-video", json!({"api_key": "g"}));
        let ctx = InvocationContext::new(CancellationToken::new());
        let err = execute_async(
            &instance,
            &transport,
            &params(json!({"prompt": "waves"})),
            &ctx,
            every_two_seconds(),
        )
        .await
        .err();
        assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::Protocol));
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exceeding_max_wait_times_out() {
        let mut replies = vec![ScriptedTransport::json(201, replicate("starting"))];
        replies.extend((0..10).map(|_| ScriptedTransport::json(200, replicate("processing"))));
        let transport = ScriptedTransport::new(replies);
        let instance = instance(PlatformId::Replicate, "kling-video", json!({"api_key": "r8"}));
        let ctx = InvocationContext::new(CancellationToken::new());
        let err = execute_async(
            &instance,
            &transport,
            &params(json!({"prompt": "waves", "start_image": "https://x/frame.png"})),
            &ctx,
            PollOptions {
                interval: Duration::from_secs(2),
                max_wait: Some(Duration::from_secs(5)),
            },
        )
        .await
        .err();
        let Some(GenerationError::Timeout { job_id, waited }) = err else {
            panic!("expected timeout");
        };
        assert_eq!(job_id, "abc");
        assert!(waited >= Duration::from_secs(5));
        assert_eq!(transport.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn status_call_that_never_answers_times_out() {
        let transport =
            ScriptedTransport::hanging_after(vec![ScriptedTransport::json(201, replicate("starting"))]);
        let instance = instance(PlatformId::Replicate, "sdxl", json!({"api_key": "r8"}));
        let ctx = InvocationContext::new(CancellationToken::new());
        let err = execute_async(
            &instance,
            &transport,
            &params(json!({"prompt": "fox"})),
            &ctx,
            PollOptions {
                interval: Duration::from_secs(2),
                max_wait: Some(Duration::from_secs(5)),
            },
        )
        .await
        .err();
        let Some(GenerationError::Timeout { job_id, waited }) = err else {
            panic!("expected timeout");
        };
        assert_eq!(job_id, "abc");
        assert!(waited >= Duration::from_secs(5));
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn result_fetch_that_never_answers_times_out() {
        let queue = "https://queue.fal.run/fal-ai/flux/dev/requests/req-1";
        let transport = ScriptedTransport::hanging_after(vec![
            ScriptedTransport::json(
                200,
                json!({
                    "request_id": "req-1",
                    "status_url": format!("{queue}/status"),
                    "response_url": queue,
                }),
            ),
            ScriptedTransport::json(200, json!({"status": "COMPLETED"})),
        ]);
        let instance = instance(PlatformId::Fal, "flux-dev", json!({"api_key": "k"}));
        let ctx = InvocationContext::new(CancellationToken::new());
        let err = execute_async(
            &instance,
            &transport,
            &params(json!({"prompt": "fox"})),
            &ctx,
            PollOptions {
                interval: Duration::from_secs(1),
                max_wait: Some(Duration::from_secs(10)),
            },
        )
        .await
        .err();
        let Some(GenerationError::Timeout { job_id, waited }) = err else {
            panic!("expected timeout");
        };
        assert_eq!(job_id, "req-1");
        assert!(waited >= Duration::from_secs(10));
        assert_eq!(transport.calls().last().map(|call| call.url.as_str()), Some(queue));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let mut replies = vec![ScriptedTransport::json(201, replicate("starting"))];
        replies.extend((0..10).map(|_| ScriptedTransport::json(200, replicate("processing"))));
        let transport = ScriptedTransport::new(replies);
        let instance = instance(PlatformId::Replicate, "sdxl", json!({"api_key": "r8"}));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });
        let ctx = InvocationContext::new(cancel);
        let err = execute_async(
            &instance,
            &transport,
            &params(json!({"prompt": "fox"})),
            &ctx,
            every_two_seconds(),
        )
        .await
        .err();
        let Some(GenerationError::Canceled { job_id }) = err else {
            panic!("expected cancellation");
        };
        assert_eq!(job_id.as_deref(), Some("abc"));
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn canceled_before_submission_sends_nothing() {
        let transport = ScriptedTransport::new(vec![]);
        let instance = instance(PlatformId::Fal, "flux-dev", json!({"api_key": "k"}));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = InvocationContext::new(cancel);
        let err = execute_async(
            &instance,
            &transport,
            &params(json!({"prompt": "fox"})),
            &ctx,
            every_two_seconds(),
        )
        .await
        .err();
        assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::Canceled));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fal_fetches_the_response_url_after_completion() {
        let queue = "https://queue.fal.run/fal-ai/flux/dev/requests/req-1";
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::json(
                200,
                json!({
                    "request_id": "req-1",
                    "status_url": format!("{queue}/status"),
                    "response_url": queue,
                }),
            ),
            ScriptedTransport::json(200, json!({"status": "IN_QUEUE", "queue_position": 2})),
            ScriptedTransport::json(200, json!({"status": "COMPLETED"})),
            ScriptedTransport::json(
                200,
                json!({"images": [{"url": "https://fal.media/fox.png"}], "seed": 7}),
            ),
        ]);
        let instance = instance(PlatformId::Fal, "flux-dev", json!({"api_key": "k"}));
        let ctx = InvocationContext::new(CancellationToken::new());
        let result = execute_async(
            &instance,
            &transport,
            &params(json!({"prompt": "a red fox"})),
            &ctx,
            every_two_seconds(),
        )
        .await
        .unwrap();

        assert_eq!(result.prediction_id.as_deref(), Some("req-1"));
        assert_eq!(result.output_urls, vec!["https://fal.media/fox.png"]);
        let urls: Vec<String> = transport.calls().into_iter().map(|call| call.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://queue.fal.run/fal-ai/flux/dev".to_string(),
                format!("{queue}/status"),
                format!("{queue}/status"),
                queue.to_string(),
            ]
        );
    }
}
