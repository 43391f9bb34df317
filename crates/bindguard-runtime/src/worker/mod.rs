//! Verification worker.
//!
//! Runs inside the disposable child process. It speaks the line protocol on
//! stdin/stdout, loads the candidate binary when told to, and runs the
//! functional test. Anything the binary does to the process (abort, segfault,
//! hang) is the supervisor's problem, not this module's.

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use bindguard_core::protocol::{
    CLEAN_EXIT_CODE, LOAD_FAILURE_EXIT_CODE, ORPHANED_EXIT_CODE, PANIC_EXIT_CODE,
    PROTOCOL_ERROR_EXIT_CODE, encode_line, parse_supervisor_line,
};
use bindguard_core::{
    BackendKind, BindingError, BindingLoader, FailureStage, LogVerbosity, NativeBinding,
    ProtocolError, SupervisorMessage, WorkerMessage,
};

/// A test step that failed without taking the process down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub stage: FailureStage,
    pub reason: String,
}

impl StepFailure {
    fn new(stage: FailureStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }

    fn at(stage: FailureStage) -> impl FnOnce(BindingError) -> Self {
        move |e| Self::new(stage, e.to_string())
    }
}

/// Serves one verification over a pair of byte streams.
pub struct VerificationWorker {
    loader: Arc<dyn BindingLoader>,
}

impl VerificationWorker {
    pub fn new(loader: Arc<dyn BindingLoader>) -> Self {
        Self { loader }
    }

    /// Serve the process's own stdin/stdout.
    pub async fn run_stdio(&self) -> i32 {
        self.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Run the protocol until `Exit`, EOF, or a fatal error.
    ///
    /// Returns the process exit code.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> i32
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if send(&mut output, &WorkerMessage::Ready).await.is_err() {
            return ORPHANED_EXIT_CODE;
        }
        debug!("Worker ready");

        let mut lines = input.lines();
        let mut binding: Option<Box<dyn NativeBinding>> = None;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    warn!("Supervisor closed stdin, exiting");
                    return ORPHANED_EXIT_CODE;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read from supervisor");
                    return ORPHANED_EXIT_CODE;
                }
            };

            let message = match parse_supervisor_line(&line) {
                Ok(message) => message,
                Err(ProtocolError::Empty) => continue,
                Err(e) => {
                    error!(error = %e, "Unreadable command from supervisor");
                    return PROTOCOL_ERROR_EXIT_CODE;
                }
            };

            let reply = match message {
                SupervisorMessage::Exit => {
                    debug!("Exit requested");
                    return CLEAN_EXIT_CODE;
                }
                SupervisorMessage::Start { binary_path, .. } if binding.is_none() => {
                    match self.load(&binary_path) {
                        Ok(loaded) => {
                            binding = Some(loaded);
                            WorkerMessage::Loaded
                        }
                        Err(e) => {
                            error!(binary = %binary_path.display(), error = %e, "Failed to load binary");
                            return LOAD_FAILURE_EXIT_CODE;
                        }
                    }
                }
                SupervisorMessage::RunTest {
                    binary_path,
                    backend_kind,
                } => {
                    let Some(loaded) = binding.as_deref() else {
                        error!("Test requested before a binary was loaded");
                        return PROTOCOL_ERROR_EXIT_CODE;
                    };
                    match run_test(loaded, &binary_path, backend_kind).await {
                        Ok(()) => WorkerMessage::Done,
                        Err(failure) => {
                            warn!(stage = %failure.stage, reason = %failure.reason, "Functional test failed");
                            WorkerMessage::Failed {
                                stage: failure.stage,
                                reason: failure.reason,
                            }
                        }
                    }
                }
                message @ SupervisorMessage::Start { .. } => {
                    error!(?message, "Binary already loaded");
                    return PROTOCOL_ERROR_EXIT_CODE;
                }
            };

            if send(&mut output, &reply).await.is_err() {
                return ORPHANED_EXIT_CODE;
            }
        }
    }

    fn load(&self, binary_path: &Path) -> Result<Box<dyn NativeBinding>, BindingError> {
        let binding = self.loader.load(binary_path)?;
        if let Err(e) = binding.set_log_verbosity(LogVerbosity::Error) {
            warn!(error = %e, "Could not lower native log verbosity");
        }
        info!(binary = %binary_path.display(), "Binary loaded");
        Ok(binding)
    }
}

async fn send<W: AsyncWrite + Unpin>(output: &mut W, message: &WorkerMessage) -> io::Result<()> {
    let line = encode_line(message).map_err(io::Error::other)?;
    output.write_all(line.as_bytes()).await?;
    output.flush().await
}

/// Exercise a loaded binary and check it is what it claims to be.
pub async fn run_test(
    binding: &dyn NativeBinding,
    binary_path: &Path,
    expected: Option<BackendKind>,
) -> Result<(), StepFailure> {
    binding
        .check_symbols()
        .map_err(StepFailure::at(FailureStage::Bind))?;

    binding
        .load_backends(None)
        .map_err(StepFailure::at(FailureStage::LoadBackends))?;
    let mut reported = binding
        .backend_kind()
        .map_err(StepFailure::at(FailureStage::LoadBackends))?;

    // Plugins shipped next to the binary are not always on the default search path
    if reported.is_none()
        && expected.is_some()
        && let Some(dir) = binary_path.parent()
    {
        info!(dir = %dir.display(), "No backend found, re-probing next to binary");
        binding
            .load_backends(Some(dir.to_path_buf()))
            .map_err(StepFailure::at(FailureStage::LoadBackends))?;
        reported = binding
            .backend_kind()
            .map_err(StepFailure::at(FailureStage::LoadBackends))?;
    }

    binding
        .initialize()
        .await
        .map_err(StepFailure::at(FailureStage::Initialize))?;

    let memory = binding
        .memory_info()
        .map_err(StepFailure::at(FailureStage::MemoryInfo))?;
    info!(
        total_bytes = memory.total_bytes,
        used_bytes = memory.used_bytes,
        "Device memory"
    );

    let devices = binding
        .device_names()
        .map_err(StepFailure::at(FailureStage::DeviceInfo))?;
    info!(?devices, "Devices");

    let wanted = expected.map(BackendKind::as_str);
    if reported.as_deref() != wanted {
        return Err(StepFailure::new(
            FailureStage::BackendIdentity,
            format!(
                "expected {}, got {}",
                wanted.unwrap_or("none"),
                reported.as_deref().unwrap_or("none")
            ),
        ));
    }

    binding
        .assert_device_supported()
        .map_err(StepFailure::at(FailureStage::DeviceSupport))?;

    Ok(())
}

/// Make any panic in the worker exit with `PANIC_EXIT_CODE`.
///
/// The default hook still runs first, so the message reaches stderr.
pub fn install_panic_exit_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        std::process::exit(PANIC_EXIT_CODE);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bindguard_core::MemoryInfo;
    use bindguard_core::protocol::parse_worker_line;
    use mockall::mock;
    use mockall::predicate::eq;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{DuplexStream, duplex};
    use tokio::task::JoinHandle;

    mock! {
        pub Binding {}

        #[async_trait]
        impl NativeBinding for Binding {
            fn check_symbols(&self) -> Result<(), BindingError>;
            fn load_backends(&self, directory_hint: Option<PathBuf>) -> Result<(), BindingError>;
            fn backend_kind(&self) -> Result<Option<String>, BindingError>;
            async fn initialize(&self) -> Result<(), BindingError>;
            fn memory_info(&self) -> Result<MemoryInfo, BindingError>;
            fn device_names(&self) -> Result<Vec<String>, BindingError>;
            fn assert_device_supported(&self) -> Result<(), BindingError>;
            fn set_log_verbosity(&self, level: LogVerbosity) -> Result<(), BindingError>;
        }
    }

    /// Hands out one prepared binding, then fails.
    struct OnceLoader(Mutex<Option<MockBinding>>);

    impl OnceLoader {
        fn with(binding: MockBinding) -> Arc<Self> {
            Arc::new(Self(Mutex::new(Some(binding))))
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self(Mutex::new(None)))
        }
    }

    impl BindingLoader for OnceLoader {
        fn load(&self, path: &Path) -> Result<Box<dyn NativeBinding>, BindingError> {
            self.0
                .lock()
                .unwrap()
                .take()
                .map(|b| Box::new(b) as Box<dyn NativeBinding>)
                .ok_or_else(|| BindingError::LoadFailed {
                    path: path.to_path_buf(),
                    reason: "cannot open shared object file".to_string(),
                })
        }
    }

    /// A binding that passes every step and reports `backend`.
    fn healthy(backend: Option<&'static str>) -> MockBinding {
        let mut binding = MockBinding::new();
        binding.expect_set_log_verbosity().returning(|_| Ok(()));
        binding.expect_check_symbols().returning(|| Ok(()));
        binding.expect_load_backends().returning(|_| Ok(()));
        binding
            .expect_backend_kind()
            .returning(move || Ok(backend.map(str::to_string)));
        binding.expect_initialize().returning(|| Ok(()));
        binding.expect_memory_info().returning(|| {
            Ok(MemoryInfo {
                total_bytes: 16 << 30,
                used_bytes: 1 << 30,
            })
        });
        binding
            .expect_device_names()
            .returning(|| Ok(vec!["Test GPU".to_string()]));
        binding.expect_assert_device_supported().returning(|| Ok(()));
        binding
    }

    /// Supervisor end of an in-process worker.
    struct Harness {
        to_worker: DuplexStream,
        from_worker: tokio::io::Lines<BufReader<DuplexStream>>,
        task: JoinHandle<i32>,
    }

    impl Harness {
        fn start(loader: Arc<dyn BindingLoader>) -> Self {
            let (to_worker, worker_stdin) = duplex(4096);
            let (worker_stdout, from_worker) = duplex(4096);
            let worker = VerificationWorker::new(loader);
            let task = tokio::spawn(async move {
                worker.run(BufReader::new(worker_stdin), worker_stdout).await
            });
            Self {
                to_worker,
                from_worker: BufReader::new(from_worker).lines(),
                task,
            }
        }

        async fn send(&mut self, message: &SupervisorMessage) {
            let line = encode_line(message).unwrap();
            self.to_worker.write_all(line.as_bytes()).await.unwrap();
        }

        async fn recv(&mut self) -> Option<WorkerMessage> {
            let line = self.from_worker.next_line().await.unwrap()?;
            Some(parse_worker_line(&line).unwrap())
        }

        async fn exit_code(self) -> i32 {
            drop(self.to_worker);
            self.task.await.unwrap()
        }
    }

    fn start(kind: Option<BackendKind>) -> SupervisorMessage {
        SupervisorMessage::Start {
            binary_path: PathBuf::from("/opt/accel/libaccel.so"),
            backend_kind: kind,
        }
    }

    fn run_test_message(kind: Option<BackendKind>) -> SupervisorMessage {
        SupervisorMessage::RunTest {
            binary_path: PathBuf::from("/opt/accel/libaccel.so"),
            backend_kind: kind,
        }
    }

    // ------------------------------------------------------------------------
    // Protocol flow
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_full_handshake() {
        let mut h = Harness::start(OnceLoader::with(healthy(Some("cuda"))));

        assert_eq!(h.recv().await, Some(WorkerMessage::Ready));
        h.send(&start(Some(BackendKind::Cuda))).await;
        assert_eq!(h.recv().await, Some(WorkerMessage::Loaded));
        h.send(&run_test_message(Some(BackendKind::Cuda))).await;
        assert_eq!(h.recv().await, Some(WorkerMessage::Done));
        h.send(&SupervisorMessage::Exit).await;

        assert_eq!(h.exit_code().await, CLEAN_EXIT_CODE);
    }

    #[tokio::test]
    async fn test_backend_mismatch_is_graceful_failure() {
        let mut h = Harness::start(OnceLoader::with(healthy(Some("vulkan"))));

        assert_eq!(h.recv().await, Some(WorkerMessage::Ready));
        h.send(&start(Some(BackendKind::Cuda))).await;
        assert_eq!(h.recv().await, Some(WorkerMessage::Loaded));
        h.send(&run_test_message(Some(BackendKind::Cuda))).await;
        assert_eq!(
            h.recv().await,
            Some(WorkerMessage::Failed {
                stage: FailureStage::BackendIdentity,
                reason: "expected cuda, got vulkan".to_string(),
            })
        );
        h.send(&SupervisorMessage::Exit).await;

        assert_eq!(h.exit_code().await, CLEAN_EXIT_CODE);
    }

    #[tokio::test]
    async fn test_load_failure_exits_with_load_code() {
        let mut h = Harness::start(OnceLoader::failing());

        assert_eq!(h.recv().await, Some(WorkerMessage::Ready));
        h.send(&start(None)).await;

        assert_eq!(h.recv().await, None);
        assert_eq!(h.exit_code().await, LOAD_FAILURE_EXIT_CODE);
    }

    #[tokio::test]
    async fn test_stdin_eof_is_orphaned() {
        let mut h = Harness::start(OnceLoader::failing());
        assert_eq!(h.recv().await, Some(WorkerMessage::Ready));

        assert_eq!(h.exit_code().await, ORPHANED_EXIT_CODE);
    }

    #[tokio::test]
    async fn test_garbage_command_is_protocol_error() {
        let mut h = Harness::start(OnceLoader::failing());
        assert_eq!(h.recv().await, Some(WorkerMessage::Ready));
        h.to_worker.write_all(b"hello\n").await.unwrap();

        assert_eq!(h.exit_code().await, PROTOCOL_ERROR_EXIT_CODE);
    }

    #[tokio::test]
    async fn test_run_test_before_start_is_protocol_error() {
        let mut h = Harness::start(OnceLoader::with(healthy(None)));
        assert_eq!(h.recv().await, Some(WorkerMessage::Ready));
        h.send(&run_test_message(None)).await;

        assert_eq!(h.exit_code().await, PROTOCOL_ERROR_EXIT_CODE);
    }

    // ------------------------------------------------------------------------
    // Test steps
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_missing_symbol_fails_at_bind() {
        let mut binding = MockBinding::new();
        binding.expect_check_symbols().returning(|| {
            Err(BindingError::MissingSymbol(
                "bindguard_initialize".to_string(),
            ))
        });

        let failure = run_test(&binding, Path::new("/opt/libaccel.so"), None)
            .await
            .unwrap_err();
        assert_eq!(failure.stage, FailureStage::Bind);
        assert!(failure.reason.contains("bindguard_initialize"));
    }

    #[tokio::test]
    async fn test_reprobe_next_to_binary() {
        let mut binding = MockBinding::new();
        binding.expect_check_symbols().returning(|| Ok(()));
        binding
            .expect_load_backends()
            .with(eq(None::<PathBuf>))
            .times(1)
            .returning(|_| Ok(()));
        binding
            .expect_load_backends()
            .with(eq(Some(PathBuf::from("/opt/accel"))))
            .times(1)
            .returning(|_| Ok(()));
        let calls = AtomicUsize::new(0);
        binding.expect_backend_kind().times(2).returning(move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(None)
            } else {
                Ok(Some("cuda".to_string()))
            }
        });
        binding.expect_initialize().returning(|| Ok(()));
        binding
            .expect_memory_info()
            .returning(|| Ok(MemoryInfo::default()));
        binding.expect_device_names().returning(|| Ok(Vec::new()));
        binding.expect_assert_device_supported().returning(|| Ok(()));

        run_test(
            &binding,
            Path::new("/opt/accel/libaccel.so"),
            Some(BackendKind::Cuda),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_no_backend_expected_none_passes_without_reprobe() {
        let mut binding = MockBinding::new();
        binding.expect_check_symbols().returning(|| Ok(()));
        binding
            .expect_load_backends()
            .with(eq(None::<PathBuf>))
            .times(1)
            .returning(|_| Ok(()));
        binding.expect_backend_kind().times(1).returning(|| Ok(None));
        binding.expect_initialize().returning(|| Ok(()));
        binding
            .expect_memory_info()
            .returning(|| Ok(MemoryInfo::default()));
        binding.expect_device_names().returning(|| Ok(Vec::new()));
        binding.expect_assert_device_supported().returning(|| Ok(()));

        run_test(&binding, Path::new("/opt/accel/libaccel.so"), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_backend_where_none_expected_fails() {
        let binding = healthy(Some("metal"));
        let failure = run_test(&binding, Path::new("libaccel.dylib"), None)
            .await
            .unwrap_err();

        assert_eq!(failure.stage, FailureStage::BackendIdentity);
        assert_eq!(failure.reason, "expected none, got metal");
    }

    #[tokio::test]
    async fn test_initialize_failure() {
        let mut binding = MockBinding::new();
        binding.expect_check_symbols().returning(|| Ok(()));
        binding.expect_load_backends().returning(|_| Ok(()));
        binding
            .expect_backend_kind()
            .returning(|| Ok(Some("vulkan".to_string())));
        binding.expect_initialize().returning(|| {
            Err(BindingError::CallFailed {
                function: "bindguard_initialize",
                code: -3,
            })
        });

        let failure = run_test(
            &binding,
            Path::new("libaccel.so"),
            Some(BackendKind::Vulkan),
        )
        .await
        .unwrap_err();
        assert_eq!(failure.stage, FailureStage::Initialize);
        assert_eq!(failure.reason, "bindguard_initialize returned status -3");
    }

    #[tokio::test]
    async fn test_unsupported_device() {
        let mut binding = MockBinding::new();
        binding.expect_check_symbols().returning(|| Ok(()));
        binding.expect_load_backends().returning(|_| Ok(()));
        binding
            .expect_backend_kind()
            .returning(|| Ok(Some("sycl".to_string())));
        binding.expect_initialize().returning(|| Ok(()));
        binding
            .expect_memory_info()
            .returning(|| Ok(MemoryInfo::default()));
        binding.expect_device_names().returning(|| Ok(Vec::new()));
        binding.expect_assert_device_supported().returning(|| {
            Err(BindingError::CallFailed {
                function: "bindguard_assert_device_supported",
                code: 1,
            })
        });

        let failure = run_test(&binding, Path::new("libaccel.so"), Some(BackendKind::Sycl))
            .await
            .unwrap_err();
        assert_eq!(failure.stage, FailureStage::DeviceSupport);
    }
}
