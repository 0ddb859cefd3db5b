//! Scripted in-memory provider for pipeline and orchestrator tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::artifact::PdfArtifact;
use crate::provider::{FetchStep, Payload, Provider, ProviderError};
use crate::record::{Confidence, ProviderQuery};

/// What a [`ScriptedProvider`] does on every call.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Finds the text `abstract from <name>` at high confidence.
    Find,
    /// Finds a PDF artifact at `/pdfs/<record_id>.pdf`.
    FindPdf,
    /// Declines.
    Decline,
    /// Fails with a timeout error.
    TimeOut,
    /// Never completes.
    Hang,
}

/// Provider whose answer is fixed up front; counts its calls.
#[derive(Debug)]
pub struct ScriptedProvider {
    name: &'static str,
    behavior: Behavior,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Upcasts scripted providers into a chain.
pub fn chain(providers: &[Arc<ScriptedProvider>]) -> Vec<Arc<dyn Provider>> {
    providers
        .iter()
        .map(|p| Arc::clone(p) as Arc<dyn Provider>)
        .collect()
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn key(&self) -> &str {
        self.name
    }

    async fn fetch(&self, query: &ProviderQuery) -> Result<FetchStep, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Find => Ok(FetchStep::found(
                Payload::Text(format!("abstract from {}", self.name)),
                Confidence::High,
            )),
            Behavior::FindPdf => Ok(FetchStep::found(
                Payload::Pdf(PdfArtifact {
                    path: PathBuf::from(format!("/pdfs/{}.pdf", query.record_id)),
                    url: format!("https://example.org/{}.pdf", query.record_id),
                    bytes: 2048,
                }),
                Confidence::Medium,
            )),
            Behavior::Decline => Ok(FetchStep::declined("no match")),
            Behavior::TimeOut => Err(ProviderError::timeout(self.name, "http://mock")),
            Behavior::Hang => std::future::pending().await,
        }
    }
}
