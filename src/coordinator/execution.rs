//! The per-request execution loop.
//!
//! ```text
//! Running ──▶ Pending ◀──────────────┐
//!    │           │ ledger empty      │ deferred callback
//!    │           ▼                   │ registered work
//!    └──────▶ DrainingDeferred ──────┘
//!                │ nothing deferred
//!                ▼
//!            Finalizing ──▶ Sent
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::coordinator::finalize::{finalize, ResponsePlan};
use crate::coordinator::runtime::{Event, Phase, RequestEnv, Runtime};
use crate::runtime::interpreter;
use crate::runtime::RuntimeContext;
use crate::template::{CompileError, CompiledHandler};

/// Run a handler to completion and produce exactly one response plan.
///
/// A missing handler (compile failure) still passes through finalisation,
/// so upload temporaries are cleaned up the same way.
pub async fn execute(
    handler: Result<Arc<CompiledHandler>, CompileError>,
    ctx: RuntimeContext,
    env: Arc<RequestEnv>,
) -> ResponsePlan {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut rt = Runtime::new(ctx, env, tx);

    let missing = match handler {
        Ok(handler) => {
            if let Err(err) = interpreter::run_program(&mut rt, handler.program()) {
                rt.capture(err);
            }
            None
        }
        Err(err) => Some(err),
    };

    drive(&mut rt, &mut rx).await;
    finalize(rt, missing).await
}

/// Wait until the ledger is empty and no deferred callbacks remain.
pub(crate) async fn drive(rt: &mut Runtime, rx: &mut mpsc::UnboundedReceiver<Event>) {
    loop {
        if rt.pending() == 0 {
            rt.set_phase(Phase::DrainingDeferred);
            if rt.run_next_deferred() {
                continue;
            }
            break;
        }

        rt.set_phase(Phase::Pending);
        match rx.recv().await {
            Some(event) => rt.apply(event),
            // Unreachable while the runtime holds a sender.
            None => break,
        }
    }
    rt.set_phase(Phase::Finalizing);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::finalize::ServerFailure;
    use crate::runtime::{FileScope, RequestInfo, UploadedFile};
    use crate::template::compile;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn env_for(root: &std::path::Path) -> Arc<RequestEnv> {
        Arc::new(RequestEnv::new("page.jscp", FileScope::new(root)))
    }

    async fn run(source: &str, root: &std::path::Path) -> ResponsePlan {
        let ctx = RuntimeContext::new(RequestInfo {
            method: "GET".into(),
            path: "/page.jscp".into(),
            ..Default::default()
        });
        execute(compile(source, "page.jscp"), ctx, env_for(root)).await
    }

    fn body(plan: ResponsePlan) -> String {
        match plan {
            ResponsePlan::Render(r) => r.body,
            other => panic!("expected render, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_markup_only_output() {
        let dir = tempfile::tempdir().unwrap();
        let plan = run("<h1>Plain & simple</h1>", dir.path()).await;
        assert_eq!(body(plan), "<h1>Plain & simple</h1>");
    }

    #[tokio::test]
    async fn test_script_between_markup() {
        let dir = tempfile::tempdir().unwrap();
        let plan = run("Hello, <? print \"<World>\" ?>!", dir.path()).await;
        assert_eq!(body(plan), "Hello, &lt;World&gt;!");
    }

    #[tokio::test]
    async fn test_conditional_markup_and_loops() {
        let dir = tempfile::tempdir().unwrap();
        let source = "<? for n in [1, 2, 3] { if n % 2 == 1 { ?><i><? echo n ?></i><? } } ?>";
        assert_eq!(body(run(source, dir.path()).await), "<i>1</i><i>3</i>");
    }

    #[tokio::test]
    async fn test_response_waits_for_all_wait_fors() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rt = Runtime::new(
            RuntimeContext::new(RequestInfo::default()),
            env_for(dir.path()),
            tx,
        );

        // Settle in reverse registration order.
        for (i, delay) in [30u64, 20, 10, 0].into_iter().enumerate() {
            rt.spawn_wait_for(
                async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(Value::from(i))
                },
                Box::new(|rt, outcome| {
                    rt.print_unsafe(&outcome.unwrap_or_default().to_string());
                    Ok(())
                }),
            );
        }
        assert_eq!(rt.pending(), 4);

        drive(&mut rt, &mut rx).await;
        assert_eq!(rt.pending(), 0);
        assert_eq!(rt.phase(), Phase::Finalizing);
        assert_eq!(rt.context().output, vec!["3", "2", "1", "0"]);
    }

    #[tokio::test]
    async fn test_no_wait_fors_finalizes_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rt = Runtime::new(
            RuntimeContext::new(RequestInfo::default()),
            Arc::new(RequestEnv::new("t", FileScope::new("/"))),
            tx,
        );
        drive(&mut rt, &mut rx).await;
        assert_eq!(rt.phase(), Phase::Finalizing);
    }

    #[tokio::test]
    async fn test_synchronous_throw_discards_output() {
        let dir = tempfile::tempdir().unwrap();
        let plan = run("partial <? throw \"bad input\" ?> never", dir.path()).await;
        match plan {
            ResponsePlan::ServerError(ServerFailure::Runtime(err)) => {
                assert_eq!(err.to_string(), "page.jscp:1: bad input");
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_async_callbacks_and_defer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), "payload").unwrap();
        let source = r#"<?
            defer { echo "[deferred]" }
            read_file("data.txt") then text { echo text } catch e { echo "error" }
            read_file("missing.txt") then t { echo "unreachable" } catch e { echo "[missing]" }
            echo "[sync]"
        ?>"#;
        let out = body(run(source, dir.path()).await);
        assert!(out.starts_with("[sync]"));
        assert!(out.contains("payload"));
        assert!(out.contains("[missing]"));
        assert!(out.ends_with("[deferred]"));
        assert!(!out.contains("unreachable"));
    }

    #[tokio::test]
    async fn test_deferred_work_keeps_request_open() {
        let dir = tempfile::tempdir().unwrap();
        let source = r#"<?
            defer {
                write_file("out.txt", "late") then { echo "written" }
            }
        ?>"#;
        assert_eq!(body(run(source, dir.path()).await), "written");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "late"
        );
    }

    #[tokio::test]
    async fn test_throw_inside_callback_is_captured() {
        let dir = tempfile::tempdir().unwrap();
        let source = "<?\nsleep(1) then {\n  throw \"late failure\"\n}\n?>";
        match run(source, dir.path()).await {
            ResponsePlan::ServerError(ServerFailure::Runtime(err)) => {
                assert_eq!(err.line, Some(3));
                assert_eq!(err.message, "late failure");
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_compile_failure_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let plan = run("<? if { ?>", dir.path()).await;
        assert!(matches!(
            plan,
            ResponsePlan::ServerError(ServerFailure::Compile(_))
        ));
    }

    #[tokio::test]
    async fn test_unhandled_uploads_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept.tmp");
        let dropped = dir.path().join("dropped.tmp");
        std::fs::write(&kept, "k").unwrap();
        std::fs::write(&dropped, "d").unwrap();

        let mut ctx = RuntimeContext::new(RequestInfo::default());
        for (field, path) in [("keep", &kept), ("drop", &dropped)] {
            ctx.uploads.push(UploadedFile {
                field: field.into(),
                file_name: format!("{field}.txt"),
                original_name: format!("{field}.txt"),
                content_type: None,
                size: 1,
                path: path.clone(),
                handled: false,
            });
        }

        let source = r#"<? keep_upload("keep", "saved/keep.txt") then { echo upload("keep").name } ?>"#;
        let plan = execute(compile(source, "page.jscp"), ctx, env_for(dir.path())).await;
        assert_eq!(body(plan), "keep.txt");
        assert!(!dropped.exists());
        assert!(!kept.exists());
        assert!(dir.path().join("saved/keep.txt").exists());
    }

    fn staged_upload(field: &str, path: &std::path::Path) -> UploadedFile {
        UploadedFile {
            field: field.into(),
            file_name: format!("{field}.txt"),
            original_name: format!("{field}.txt"),
            content_type: None,
            size: 1,
            path: path.to_path_buf(),
            handled: false,
        }
    }

    #[tokio::test]
    async fn test_failed_keep_upload_is_still_removed() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("doc.tmp");
        std::fs::write(&staged, "d").unwrap();
        // A non-empty directory cannot be replaced by a file.
        std::fs::create_dir_all(dir.path().join("taken/inner")).unwrap();

        let mut ctx = RuntimeContext::new(RequestInfo::default());
        ctx.uploads.push(staged_upload("doc", &staged));

        let source = r#"<? keep_upload("doc", "taken") catch e { echo "failed" } ?>"#;
        let plan = execute(compile(source, "page.jscp"), ctx, env_for(dir.path())).await;
        assert_eq!(body(plan), "failed");
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn test_keep_upload_without_callbacks_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("doc.tmp");
        std::fs::write(&staged, "d").unwrap();

        let mut ctx = RuntimeContext::new(RequestInfo::default());
        ctx.uploads.push(staged_upload("doc", &staged));

        let source = r#"<? keep_upload("doc", "saved/doc.txt") ?>done"#;
        let plan = execute(compile(source, "page.jscp"), ctx, env_for(dir.path())).await;
        assert_eq!(body(plan), "done");
        assert!(!staged.exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("saved/doc.txt")).unwrap(),
            "d"
        );
    }

    #[test]
    fn test_execute_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let ctx = RuntimeContext::new(RequestInfo::default());
        let future = execute(
            compile("<? print 1 ?>", "page.jscp"),
            ctx,
            env_for(std::path::Path::new("/nonexistent")),
        );
        assert_send(&future);
    }

    #[tokio::test]
    async fn test_params_and_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = RuntimeContext::new(RequestInfo::default());
        ctx.params.insert("name".into(), json!("ada"));
        let source = r#"<? status(201); header("X-Kind", "test"); print upper(param("name")) + "/" + len(params()) ?>"#;
        match execute(compile(source, "page.jscp"), ctx, env_for(dir.path())).await {
            ResponsePlan::Render(r) => {
                assert_eq!(r.status, 201);
                assert_eq!(r.body, "ADA/1");
                assert!(r.headers.contains(&("X-Kind".to_string(), "test".to_string())));
            }
            other => panic!("expected render, got {other:?}"),
        }
    }
}
