//! Debounced request coalescing in front of the translation client.
//!
//! Requests arriving within one window are grouped by language,
//! deduplicated and sent as a single `translate_batch` per language.

use super::client::TranslationClient;
use crate::language::Language;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(50);

struct Pending {
    text: String,
    language: Language,
    reply: oneshot::Sender<String>,
}

pub struct TranslationBatcher {
    sender: Mutex<Option<mpsc::UnboundedSender<Pending>>>,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl TranslationBatcher {
    /// Start the buffering actor on the current runtime.
    pub fn spawn(client: Arc<TranslationClient>, window: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = tokio::spawn(run(client, rx, window));
        Self {
            sender: Mutex::new(Some(tx)),
            actor: Mutex::new(Some(actor)),
        }
    }

    /// Translated text, or `text` itself when translation is unavailable.
    pub async fn translate(&self, text: impl Into<String>, language: Language) -> String {
        let text = text.into();
        match self.enqueue(text.clone(), language) {
            Some(rx) => rx.await.unwrap_or(text),
            None => text,
        }
    }

    /// Results in input order.
    pub async fn translate_many(&self, texts: &[String], language: Language) -> Vec<String> {
        let receivers: Vec<_> = texts
            .iter()
            .map(|text| self.enqueue(text.clone(), language))
            .collect();

        let mut results = Vec::with_capacity(texts.len());
        for (text, rx) in texts.iter().zip(receivers) {
            let value = match rx {
                Some(rx) => rx.await.unwrap_or_else(|_| text.clone()),
                None => text.clone(),
            };
            results.push(value);
        }
        results
    }

    fn enqueue(&self, text: String, language: Language) -> Option<oneshot::Receiver<String>> {
        let (reply, rx) = oneshot::channel();
        let sender = self.sender.lock();
        sender
            .as_ref()?
            .send(Pending {
                text,
                language,
                reply,
            })
            .ok()?;
        Some(rx)
    }

    /// Stop accepting requests, flush what is buffered and wait for the actor.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());
        let actor = self.actor.lock().take();
        if let Some(actor) = actor {
            let _ = actor.await;
            info!("Translation batcher stopped");
        }
    }
}

async fn run(
    client: Arc<TranslationClient>,
    mut rx: mpsc::UnboundedReceiver<Pending>,
    window: Duration,
) {
    while let Some(first) = rx.recv().await {
        let mut buffer = vec![first];
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        let mut closed = false;
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                msg = rx.recv() => match msg {
                    Some(pending) => buffer.push(pending),
                    None => {
                        closed = true;
                        break;
                    }
                }
            }
        }

        if closed {
            dispatch(client.clone(), buffer).await;
            break;
        }
        tokio::spawn(dispatch(client.clone(), buffer));
    }
}

async fn dispatch(client: Arc<TranslationClient>, buffer: Vec<Pending>) {
    let mut by_language: HashMap<Language, Vec<Pending>> = HashMap::new();
    for pending in buffer {
        by_language.entry(pending.language).or_default().push(pending);
    }

    for (language, requests) in by_language {
        let mut unique: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for request in &requests {
            if !index.contains_key(&request.text) {
                index.insert(request.text.clone(), unique.len());
                unique.push(request.text.clone());
            }
        }
        debug!(
            language = language.code(),
            requests = requests.len(),
            unique = unique.len(),
            "Flushing translation batch"
        );

        let items = client.translate_batch(&unique, language).await;
        for request in requests {
            let value = index
                .get(&request.text)
                .and_then(|&i| items.get(i))
                .map(|item| item.translated_text.clone())
                .unwrap_or_else(|| request.text.clone());
            // Receiver may have been dropped by a cancelled caller
            let _ = request.reply.send(value);
        }
    }
}
