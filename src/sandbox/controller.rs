use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::types::JudgeletConfig;
use crate::error::{JudgeletError, Result};
use crate::instrument::{self, InstrumentOptions};
use crate::sandbox::document::{HarnessConfig, SandboxDocument};
use crate::sandbox::protocol::{
    self, Completion, ConsoleLine, CorrelationId, HostMessage, OriginPolicy, SandboxMessage,
};
use crate::sandbox::traits::{SandboxBackend, SandboxChannel, SandboxEvent};
use crate::sandbox::types::ExecutionResult;

/// Settings of an [`ExecutionController`].
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub host_origin: String,
    pub run_timeout: Duration,
    pub test_timeout: Duration,
    /// How long to wait for flushed output after a cancel request
    pub grace_period: Duration,
    pub yield_interval_ms: u64,
    pub max_log_entries: usize,
    pub instrument: InstrumentOptions,
}

impl ControllerOptions {
    pub fn from_config(config: &JudgeletConfig) -> Self {
        let exec = &config.execution;
        Self {
            host_origin: config.sandbox.host_origin.clone(),
            run_timeout: Duration::from_millis(exec.run_timeout_ms),
            test_timeout: Duration::from_millis(exec.test_timeout_ms),
            grace_period: Duration::from_millis(exec.grace_period_ms),
            yield_interval_ms: exec.yield_interval_ms,
            max_log_entries: exec.max_log_entries,
            instrument: InstrumentOptions::default(),
        }
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from_config(&JudgeletConfig::default())
    }
}

#[derive(Debug)]
enum Outcome {
    Complete(Completion),
    Exited { status: Option<i32>, stderr: String },
}

type PendingMap = HashMap<CorrelationId, oneshot::Sender<Outcome>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs programs in a sandbox backend, one at a time.
///
/// Each call to [`execute`](Self::execute) loads a fresh document, waits for
/// its single completion message and always resolves: timeouts produce a
/// cancelled result rather than an error.
pub struct ExecutionController {
    backend: Arc<dyn SandboxBackend>,
    options: ControllerOptions,
    policy: OriginPolicy,
    pending: Arc<Mutex<PendingMap>>,
    run_lock: tokio::sync::Mutex<()>,
    console: Option<mpsc::UnboundedSender<ConsoleLine>>,
    disposed: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionController {
    pub fn new(backend: Arc<dyn SandboxBackend>, options: ControllerOptions) -> Self {
        let policy = OriginPolicy::new(options.host_origin.clone());
        Self {
            backend,
            options,
            policy,
            pending: Arc::new(Mutex::new(HashMap::new())),
            run_lock: tokio::sync::Mutex::new(()),
            console: None,
            disposed: AtomicBool::new(false),
            pump: Mutex::new(None),
        }
    }

    /// Forward console lines to `observer` as they are printed.
    pub fn with_console_observer(mut self, observer: mpsc::UnboundedSender<ConsoleLine>) -> Self {
        self.console = Some(observer);
        self
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    pub fn backend(&self) -> &Arc<dyn SandboxBackend> {
        &self.backend
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(JudgeletError::Disposed);
        }
        Ok(())
    }

    /// Execute `code` with a timeout.
    ///
    /// Without `custom_script` the code is instrumented and run as is. With
    /// one, the script (which must declare `__program`) is run instead and
    /// `code` is only checked for syntax and scanned for function names.
    pub async fn execute(
        &self,
        code: &str,
        timeout: Duration,
        custom_script: Option<&str>,
    ) -> Result<ExecutionResult> {
        self.ensure_live()?;

        let prepared = match custom_script {
            None => instrument::instrument(code, &self.options.instrument)
                .map(|out| (out.code, out.function_names)),
            Some(script) => {
                instrument::function_names(code).map(|names| (script.to_string(), names))
            }
        };
        let (program, function_names) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                debug!(error = %err, "Rejected before launch");
                return Ok(ExecutionResult::syntax_error(&err));
            }
        };

        let _guard = self.run_lock.lock().await;
        self.ensure_live()?;

        let correlation_id = CorrelationId::new();
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let document = SandboxDocument::build(
            &HarnessConfig {
                correlation_id,
                host_origin: self.options.host_origin.clone(),
                timeout_ms,
                yield_interval_ms: self.options.yield_interval_ms,
                max_log_entries: self.options.max_log_entries,
                function_names,
            },
            &program,
        );

        let (tx, mut rx) = oneshot::channel();
        lock(&self.pending).insert(correlation_id, tx);

        let SandboxChannel { events, control } = match self.backend.load(&document).await {
            Ok(channel) => channel,
            Err(e) => {
                lock(&self.pending).remove(&correlation_id);
                return Err(e);
            }
        };

        let live_logs = Arc::new(Mutex::new(Vec::new()));
        let pump = tokio::spawn(pump_events(
            events,
            self.policy.clone(),
            Arc::clone(&self.pending),
            self.console.clone(),
            Arc::clone(&live_logs),
            correlation_id,
        ));
        if let Some(previous) = lock(&self.pump).replace(pump) {
            previous.abort();
        }

        info!(
            correlation_id = %correlation_id,
            backend = self.backend.name(),
            timeout_ms = timeout_ms,
            "Execution started"
        );

        let outcome = tokio::select! {
            outcome = &mut rx => Some(outcome),
            _ = tokio::time::sleep(timeout) => None,
        };

        let result = match outcome {
            Some(Ok(outcome)) => resolve(outcome, &live_logs),
            Some(Err(_)) => return Err(JudgeletError::Disposed),
            None => {
                self.cancel(correlation_id, &control, &mut rx, timeout_ms, &live_logs)
                    .await?
            }
        };

        lock(&self.pending).remove(&correlation_id);
        if let Err(e) = self.backend.unload().await {
            warn!(error = %e, "Failed to unload sandbox document");
        }

        info!(
            correlation_id = %correlation_id,
            success = result.success,
            cancelled = result.cancelled,
            logs = result.logs.len(),
            "Execution finished"
        );
        Ok(result)
    }

    async fn cancel(
        &self,
        correlation_id: CorrelationId,
        control: &mpsc::UnboundedSender<String>,
        rx: &mut oneshot::Receiver<Outcome>,
        timeout_ms: u64,
        live_logs: &Mutex<Vec<String>>,
    ) -> Result<ExecutionResult> {
        warn!(correlation_id = %correlation_id, timeout_ms = timeout_ms, "Execution timed out, cancelling");

        let line = HostMessage::CancelExecution { correlation_id }.to_line()?;
        if control.send(line).is_err() {
            debug!(correlation_id = %correlation_id, "Control channel already closed");
        }

        match tokio::time::timeout(self.options.grace_period, rx).await {
            Ok(Ok(Outcome::Complete(completion))) => Ok(ExecutionResult::timed_out(
                timeout_ms,
                completion.logs,
                completion.tracked,
            )),
            Ok(Err(_)) => Err(JudgeletError::Disposed),
            Ok(Ok(Outcome::Exited { .. })) | Err(_) => Ok(ExecutionResult::timed_out(
                timeout_ms,
                lock(live_logs).clone(),
                None,
            )),
        }
    }

    /// Reject every pending execution and stop listening to the sandbox.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let rejected = lock(&self.pending).drain().count();
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
        info!(rejected = rejected, "Execution controller disposed");
    }

    /// Dispose and tear the backend down.
    pub async fn shutdown(&self) -> Result<()> {
        self.dispose();
        self.backend.shutdown().await
    }
}

impl Drop for ExecutionController {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn resolve(outcome: Outcome, live_logs: &Mutex<Vec<String>>) -> ExecutionResult {
    match outcome {
        Outcome::Complete(completion) => completion.into_result(),
        Outcome::Exited { status, stderr } => {
            let status = status
                .map(|code| format!("status {}", code))
                .unwrap_or_else(|| "a signal".to_string());
            let mut message = format!("Sandbox exited with {} before reporting a result", status);
            let stderr = stderr.trim();
            if !stderr.is_empty() {
                message.push_str(":\n");
                message.push_str(stderr);
            }
            ExecutionResult::sandbox_failure(message, lock(live_logs).clone())
        }
    }
}

async fn pump_events(
    mut events: mpsc::UnboundedReceiver<SandboxEvent>,
    policy: OriginPolicy,
    pending: Arc<Mutex<PendingMap>>,
    console: Option<mpsc::UnboundedSender<ConsoleLine>>,
    live_logs: Arc<Mutex<Vec<String>>>,
    loaded: CorrelationId,
) {
    while let Some(event) = events.recv().await {
        let line = match event {
            SandboxEvent::Line(line) => line,
            SandboxEvent::Exited { status, stderr } => {
                if let Some(tx) = lock(&pending).remove(&loaded) {
                    let _ = tx.send(Outcome::Exited { status, stderr });
                }
                break;
            }
        };

        let envelope = match protocol::parse_line(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "Ignoring sandbox output");
                continue;
            }
        };
        if !policy.accepts(&envelope) {
            warn!(
                origin = %envelope.origin,
                target_origin = %envelope.target_origin,
                "Rejected message from untrusted origin"
            );
            continue;
        }

        match envelope.data {
            SandboxMessage::Console(line) => {
                if !lock(&pending).contains_key(&line.correlation_id) {
                    debug!(correlation_id = %line.correlation_id, "Ignoring console line for unknown execution");
                    continue;
                }
                lock(&live_logs).push(line.text.clone());
                if let Some(observer) = &console {
                    let _ = observer.send(line);
                }
            }
            SandboxMessage::ExecutionComplete(completion) => {
                let id = completion.correlation_id;
                match lock(&pending).remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(Outcome::Complete(completion));
                    }
                    None => debug!(correlation_id = %id, "Ignoring unmatched completion"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::traits::{BackendCapabilities, SandboxInfo};
    use crate::sandbox::types::ErrorKind;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    const HOST: &str = "judgelet://host";

    enum Reply {
        /// Write these lines, then exit
        Lines(Vec<String>),
        /// Write `before`, then answer a cancel request with `on_cancel`
        UntilCancelled { before: Vec<String>, on_cancel: Vec<String> },
        /// Never answer
        Silent,
        /// Exit without writing anything
        Crash(String),
    }

    type Responder = Box<dyn Fn(CorrelationId) -> Reply + Send + Sync>;

    struct ScriptedBackend {
        respond: Responder,
        loads: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(respond: impl Fn(CorrelationId) -> Reply + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                respond: Box::new(respond),
                loads: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SandboxBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn capabilities(&self) -> BackendCapabilities {
            BackendCapabilities::default()
        }

        async fn load(&self, document: &SandboxDocument) -> Result<SandboxChannel> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let (control_tx, mut control_rx) = mpsc::unbounded_channel::<String>();
            let reply = (self.respond)(document.correlation_id);
            tokio::spawn(async move {
                let send_all = |lines: Vec<String>| {
                    for line in lines {
                        let _ = events_tx.send(SandboxEvent::Line(line));
                    }
                };
                match reply {
                    Reply::Lines(lines) => send_all(lines),
                    Reply::UntilCancelled { before, on_cancel } => {
                        send_all(before);
                        while let Some(line) = control_rx.recv().await {
                            if line.contains("cancel-execution") {
                                send_all(on_cancel);
                                break;
                            }
                        }
                    }
                    Reply::Silent => {
                        while control_rx.recv().await.is_some() {}
                        return;
                    }
                    Reply::Crash(stderr) => {
                        let _ = events_tx.send(SandboxEvent::Exited {
                            status: Some(1),
                            stderr,
                        });
                        return;
                    }
                }
                let _ = events_tx.send(SandboxEvent::Exited {
                    status: Some(0),
                    stderr: String::new(),
                });
            });
            Ok(SandboxChannel {
                events: events_rx,
                control: control_tx,
            })
        }

        async fn unload(&self) -> Result<()> {
            Ok(())
        }

        fn info(&self) -> SandboxInfo {
            SandboxInfo {
                backend_type: "scripted".to_string(),
                instance_id: None,
                running: false,
                metadata: HashMap::new(),
            }
        }
    }

    fn envelope(origin: &str, data: Value) -> String {
        json!({"origin": origin, "targetOrigin": HOST, "data": data}).to_string()
    }

    fn completion(id: CorrelationId, extra: Value) -> String {
        let mut data = json!({
            "type": "execution-complete",
            "correlationId": id,
            "success": true,
            "cancelled": false,
            "logs": []
        });
        if let (Some(data), Some(extra)) = (data.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                data.insert(k.clone(), v.clone());
            }
        }
        envelope("null", data)
    }

    fn console(id: CorrelationId, text: &str) -> String {
        envelope(
            "null",
            json!({"type": "console", "correlationId": id, "level": "log", "text": text}),
        )
    }

    fn options() -> ControllerOptions {
        ControllerOptions {
            grace_period: Duration::from_millis(100),
            ..ControllerOptions::default()
        }
    }

    #[tokio::test]
    async fn test_execute_returns_completion() {
        let backend = ScriptedBackend::new(|id| {
            Reply::Lines(vec![
                console(id, "3"),
                completion(id, json!({"logs": ["3"], "tracked": {"variableTrace": {"x": [3]}}})),
            ])
        });
        let controller = ExecutionController::new(backend.clone(), options());
        let result = controller
            .execute("let x = 3; console.log(x)", Duration::from_secs(5), None)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.logs, vec!["3"]);
        assert_eq!(result.tracked.unwrap().first_value("x"), Some(&json!(3)));
        assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_syntax_error_never_launches() {
        let backend = ScriptedBackend::new(|_| Reply::Silent);
        let controller = ExecutionController::new(backend.clone(), options());
        let result = controller
            .execute("function (", Duration::from_secs(5), None)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Syntax));
        assert_eq!(backend.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_keeps_flushed_logs_and_drops_result() {
        let backend = ScriptedBackend::new(|id| Reply::UntilCancelled {
            before: vec![console(id, "tick")],
            on_cancel: vec![completion(
                id,
                json!({
                    "success": false,
                    "cancelled": true,
                    "logs": ["tick", "Execution timed out after 50ms"],
                    "result": 42
                }),
            )],
        });
        let controller = ExecutionController::new(backend, options());
        let result = controller
            .execute("while (true) {}", Duration::from_millis(50), None)
            .await
            .unwrap();
        assert!(result.cancelled);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert!(result.result.is_none());
        assert_eq!(result.logs.len(), 2);
    }

    #[tokio::test]
    async fn test_unresponsive_sandbox_resolves_after_grace() {
        let backend = ScriptedBackend::new(|_| Reply::Silent);
        let controller = ExecutionController::new(backend, options());
        let started = Instant::now();
        let result = controller
            .execute("while (true) {}", Duration::from_millis(50), None)
            .await
            .unwrap();
        assert!(result.cancelled);
        assert!(result.result.is_none());
        assert!(started.elapsed() < Duration::from_millis(50 + 100 + 500));
    }

    #[tokio::test]
    async fn test_ignores_untrusted_and_unmatched_messages() {
        let backend = ScriptedBackend::new(|id| {
            Reply::Lines(vec![
                "not json".to_string(),
                completion(CorrelationId::new(), json!({"logs": ["stale"]})),
                {
                    let data = json!({
                        "type": "execution-complete",
                        "correlationId": id,
                        "success": true,
                        "cancelled": false,
                        "logs": ["forged"]
                    });
                    envelope("https://evil.example", data)
                },
                completion(id, json!({"logs": ["real"]})),
            ])
        });
        let controller = ExecutionController::new(backend, options());
        let result = controller
            .execute("1", Duration::from_secs(5), None)
            .await
            .unwrap();
        assert_eq!(result.logs, vec!["real"]);
    }

    #[tokio::test]
    async fn test_exit_without_completion_is_sandbox_error() {
        let backend = ScriptedBackend::new(|_| Reply::Crash("FATAL ERROR: heap limit".to_string()));
        let controller = ExecutionController::new(backend, options());
        let result = controller
            .execute("1", Duration::from_secs(5), None)
            .await
            .unwrap();
        assert_eq!(result.error_kind, Some(ErrorKind::Sandbox));
        assert!(result.error.unwrap().contains("heap limit"));
    }

    #[tokio::test]
    async fn test_dispose_rejects_pending_execution() {
        let backend = ScriptedBackend::new(|_| Reply::Silent);
        let controller = Arc::new(ExecutionController::new(backend, options()));
        let running = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                controller
                    .execute("while (true) {}", Duration::from_secs(30), None)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.dispose();
        let outcome = running.await.unwrap();
        assert!(matches!(outcome, Err(JudgeletError::Disposed)));

        let again = controller.execute("1", Duration::from_secs(1), None).await;
        assert!(matches!(again, Err(JudgeletError::Disposed)));
    }

    #[tokio::test]
    async fn test_console_observer_receives_lines() {
        let backend = ScriptedBackend::new(|id| {
            Reply::Lines(vec![console(id, "hello"), completion(id, json!({"logs": ["hello"]}))])
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller = ExecutionController::new(backend, options()).with_console_observer(tx);
        controller
            .execute("console.log('hello')", Duration::from_secs(5), None)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().text, "hello");
    }

    #[tokio::test]
    async fn test_custom_script_checks_code_syntax() {
        let backend = ScriptedBackend::new(|_| Reply::Silent);
        let controller = ExecutionController::new(backend.clone(), options());
        let result = controller
            .execute("let = ;", Duration::from_secs(1), Some("async function __program() {}"))
            .await
            .unwrap();
        assert_eq!(result.error_kind, Some(ErrorKind::Syntax));
        assert_eq!(backend.loads.load(Ordering::SeqCst), 0);
    }
}
