use echodraft_core::types::{InsertionTarget, OutputMode, PROVIDER_LOCAL_WHISPER, StopSource};
use echodraft_engine::pipeline::{DictationEngine, EngineDeps, StartOptions, StopOptions};
use echodraft_engine::router::ProviderRouter;
use echodraft_engine::settings::{Settings, StaticSettings};
use echodraft_engine::traits::{HostActions, MicrophoneCapture, PermissionState};
use echodraft_runtime::backends::MockTranscriptionBackend;
use echodraft_runtime::cleanup::ByokCleanup;
use echodraft_runtime::dictionary::FileDictionaryStore;
use echodraft_runtime::store::FileTranscriptionStore;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

struct ConsoleHost;

#[async_trait::async_trait]
impl HostActions for ConsoleHost {
    async fn capture_insertion_target(&self) -> anyhow::Result<Option<InsertionTarget>> {
        Ok(Some(
            InsertionTarget::new(0x1234, 4242)
                .with_process_name("notepad.exe")
                .with_title("Untitled - Notepad"),
        ))
    }

    async fn paste_text(&self, text: &str, target: &InsertionTarget) -> anyhow::Result<()> {
        println!("[paste -> {}] {}", target.process_name.as_deref().unwrap_or("?"), text);
        Ok(())
    }

    async fn write_clipboard(&self, text: &str) -> anyhow::Result<()> {
        println!("[clipboard] {text}");
        Ok(())
    }

    async fn read_clipboard(&self) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// Feeds a short burst of fake speech, then closes on stop.
#[derive(Default)]
struct DemoCapture {
    tx: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
}

#[async_trait::async_trait]
impl MicrophoneCapture for DemoCapture {
    async fn permission_state(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn open(&self, sample_rate_hz: u32) -> anyhow::Result<mpsc::Receiver<Vec<f32>>> {
        let (tx, rx) = mpsc::channel(16);
        for _ in 0..4 {
            let _ = tx.send(vec![0.2; sample_rate_hz as usize / 10]).await;
        }
        *self.tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        Ok(rx)
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }

    async fn cancel(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    // End-to-end demo: mock capture + mock transcription, real stores under
    // the system temp dir. Set CLEANUP_API_KEY (and optionally
    // CLEANUP_BASE_URL / CLEANUP_MODEL) to run real reasoning cleanup.
    let data_dir = std::env::temp_dir().join("echodraft-demo");

    let dictionary = Arc::new(FileDictionaryStore::at_path(data_dir.join("dictionary.json")));
    dictionary.add_term("EchoDraft")?;
    dictionary.add_term("Kubernetes")?;

    let store = Arc::new(FileTranscriptionStore::at_path(data_dir.join("history.json")));

    let mut router = ProviderRouter::new();
    router.register(
        PROVIDER_LOCAL_WHISPER,
        Arc::new(MockTranscriptionBackend::new(
            "um so the EchoDraft rollout to Kubernetes is basically done",
            PROVIDER_LOCAL_WHISPER,
        )),
    );

    let cleanup_key = std::env::var("CLEANUP_API_KEY").unwrap_or_default();
    let cleanup: Option<Arc<dyn echodraft_engine::traits::CleanupBackend>> =
        if cleanup_key.trim().is_empty() {
            None
        } else {
            let base_url = std::env::var("CLEANUP_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into());
            let model =
                std::env::var("CLEANUP_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
            Some(Arc::new(ByokCleanup::new(base_url, cleanup_key, model)))
        };
    let cleanup_enabled = cleanup.is_some();

    let settings = Arc::new(StaticSettings::new(Settings {
        cleanup_enabled,
        ..Settings::default()
    }));

    let engine = Arc::new(DictationEngine::new(EngineDeps {
        host: Arc::new(ConsoleHost),
        capture: Arc::new(DemoCapture::default()),
        router,
        cleanup,
        store: store.clone(),
        dictionary,
        settings,
        streaming: None,
    }));

    let mut progress = engine.subscribe_progress();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = progress.borrow().clone();
            println!(
                "[stage] {} ({:.0}%)",
                p.stage_label,
                p.overall_progress * 100.0
            );
        }
    });

    engine.warm_up().await;

    for mode in [OutputMode::Insert, OutputMode::Clipboard] {
        let started = engine
            .start_dictation(StartOptions {
                output_mode: Some(mode),
                ..Default::default()
            })
            .await?;
        anyhow::ensure!(started, "engine refused to start");

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let result = engine
            .stop_dictation(StopOptions {
                stop_source: StopSource::Manual,
                ..Default::default()
            })
            .await?;

        println!("mode={mode:?} source={} text={:?}", result.source, result.text);
    }

    // Give the async timing patch a moment to land before reading back.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let records = store.load()?;
    println!("history entries: {}", records.len());

    Ok(())
}
