//! One inbound image to one reply.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use provtag_contracts::blob::{is_accepted_file_name, ImageBlob};
use provtag_contracts::provenance::ProvenanceRecord;
use provtag_contracts::report::Report;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::composer::compose;
use crate::reader::MetadataReader;
use crate::tagger::TagInference;

pub const NOT_AN_IMAGE_TEXT: &str = "Not An image";
pub const TAGGING_FAILED_TEXT: &str = "Tagging failed, please try again later";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFile {
    pub file_id: String,
    pub file_name: String,
}

impl InboundFile {
    pub fn new(file_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            file_name: file_name.into(),
        }
    }
}

/// Resolves an inbound file reference to its bytes. `Ok(None)` means nothing
/// could be fetched.
pub trait ImageDownloader: Send + Sync {
    fn download(&self, file: &InboundFile) -> impl Future<Output = Result<Option<Bytes>>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Report(Report),
    NotAnImage,
    TaggingFailed,
}

impl Reply {
    pub fn render(&self) -> String {
        match self {
            Self::Report(report) => report.render(),
            Self::NotAnImage => NOT_AN_IMAGE_TEXT.to_string(),
            Self::TaggingFailed => TAGGING_FAILED_TEXT.to_string(),
        }
    }
}

pub struct Orchestrator<D, T> {
    downloader: D,
    tagger: T,
    reader: Arc<MetadataReader>,
}

impl<D, T> Orchestrator<D, T>
where
    D: ImageDownloader,
    T: TagInference,
{
    pub fn new(downloader: D, tagger: T, reader: MetadataReader) -> Self {
        Self {
            downloader,
            tagger,
            reader: Arc::new(reader),
        }
    }

    pub async fn handle(&self, file: &InboundFile) -> Reply {
        let trace_id = Uuid::new_v4();
        let span = info_span!("request", trace_id = %trace_id, file_name = %file.file_name);
        self.handle_inner(file).instrument(span).await
    }

    async fn handle_inner(&self, file: &InboundFile) -> Reply {
        if !is_accepted_file_name(&file.file_name) {
            info!("unsupported file extension");
            return Reply::NotAnImage;
        }
        let downloaded = match self.downloader.download(file).await {
            Ok(downloaded) => downloaded,
            Err(err) => {
                error!(error = %format!("{err:#}"), "download failed");
                return Reply::TaggingFailed;
            }
        };
        let Some(blob) = downloaded.and_then(|bytes| ImageBlob::from_upload(&file.file_name, bytes))
        else {
            warn!(file_id = %file.file_id, "downloader returned no image bytes");
            return Reply::NotAnImage;
        };
        match self.tag_blob(&blob).await {
            Ok(report) => Reply::Report(report),
            Err(err) => {
                error!(error = %format!("{err:#}"), "tagging failed");
                Reply::TaggingFailed
            }
        }
    }

    pub async fn tag_blob(&self, blob: &ImageBlob) -> Result<Report> {
        let reader = Arc::clone(&self.reader);
        let shared = blob.clone();
        let read_task = tokio::task::spawn_blocking(move || reader.read(&shared));
        let (provenance, inference) = tokio::join!(read_task, self.tagger.infer(blob));
        let provenance = provenance.unwrap_or_else(|err| {
            warn!(error = %err, "metadata read task failed");
            ProvenanceRecord::NoMetadata
        });
        let inference = inference?;
        info!(
            format = provenance.label(),
            tags = inference.tags.len(),
            characters = inference.characters.len(),
            "request tagged"
        );
        Ok(compose(&inference, &provenance))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::{bail, Result};
    use bytes::Bytes;
    use provtag_contracts::blob::ImageBlob;
    use provtag_contracts::inference::InferenceResult;
    use provtag_contracts::report::Block;

    use super::{ImageDownloader, InboundFile, Orchestrator, Reply};
    use crate::fixtures::{blank_png, png_with_text};
    use crate::reader::MetadataReader;
    use crate::tagger::TagInference;

    struct MapDownloader {
        files: HashMap<String, Bytes>,
        calls: AtomicUsize,
    }

    impl MapDownloader {
        fn with(file_id: &str, bytes: impl Into<Bytes>) -> Self {
            let mut files = HashMap::new();
            files.insert(file_id.to_string(), bytes.into());
            Self {
                files,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ImageDownloader for MapDownloader {
        async fn download(&self, file: &InboundFile) -> Result<Option<Bytes>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if file.file_id == "broken-transport" {
                bail!("connection reset");
            }
            Ok(self.files.get(&file.file_id).cloned())
        }
    }

    struct StubTagger {
        tags: &'static str,
        characters: Vec<&'static str>,
    }

    impl TagInference for StubTagger {
        async fn infer(&self, _blob: &ImageBlob) -> Result<InferenceResult> {
            Ok(InferenceResult::from_tag_string(
                self.tags,
                self.characters.iter().copied(),
            ))
        }
    }

    struct FailingTagger;

    impl TagInference for FailingTagger {
        async fn infer(&self, _blob: &ImageBlob) -> Result<InferenceResult> {
            bail!("tagger request failed (http://127.0.0.1:10011/upload/): timed out")
        }
    }

    fn stub() -> StubTagger {
        StubTagger {
            tags: "1girl,solo",
            characters: Vec::new(),
        }
    }

    #[tokio::test]
    async fn a111_png_end_to_end() -> Result<()> {
        let blob = png_with_text(&[(
            "parameters",
            "masterpiece, Negative prompt: blurry, Steps: 20, Sampler: Euler",
        )])?;
        let downloader = MapDownloader::with("file-1", blob.shared());
        let orchestrator = Orchestrator::new(downloader, stub(), MetadataReader::default());

        let reply = orchestrator.handle(&InboundFile::new("file-1", "render.png")).await;
        let report = match reply {
            Reply::Report(report) => report,
            other => bail!("expected a report, got {other:?}"),
        };
        assert_eq!(
            report.blocks(),
            &[
                Block::heading("Tags"),
                Block::quote("1girl,solo"),
                Block::code("masterpiece", "txt"),
                Block::heading("Negative Prompt"),
                Block::quote("blurry"),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn same_bytes_give_identical_reports() -> Result<()> {
        let bytes = Bytes::from(blank_png(16, 16)?);
        let orchestrator = Orchestrator::new(
            MapDownloader::with("file-2", bytes.clone()),
            stub(),
            MetadataReader::default(),
        );
        let file = InboundFile::new("file-2", "plain.PNG");
        let first = orchestrator.handle(&file).await;
        let second = orchestrator.handle(&file).await;
        assert_eq!(first, second);
        assert!(first.render().contains("*No Metadata*"));
        Ok(())
    }

    #[tokio::test]
    async fn unsupported_extension_skips_download() {
        let downloader = MapDownloader::with("file-3", vec![1u8, 2, 3]);
        let orchestrator = Orchestrator::new(downloader, stub(), MetadataReader::default());
        let reply = orchestrator.handle(&InboundFile::new("file-3", "clip.gif")).await;
        assert_eq!(reply, Reply::NotAnImage);
        assert_eq!(reply.render(), "Not An image");
        assert_eq!(orchestrator.downloader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_download_is_not_an_image() {
        let orchestrator = Orchestrator::new(
            MapDownloader::with("other", vec![1u8]),
            stub(),
            MetadataReader::default(),
        );
        let reply = orchestrator.handle(&InboundFile::new("absent", "a.jpg")).await;
        assert_eq!(reply, Reply::NotAnImage);

        let empty = Orchestrator::new(
            MapDownloader::with("empty", Vec::<u8>::new()),
            stub(),
            MetadataReader::default(),
        );
        let reply = empty.handle(&InboundFile::new("empty", "a.webp")).await;
        assert_eq!(reply, Reply::NotAnImage);
    }

    #[tokio::test]
    async fn download_transport_error_is_tagging_failure() {
        let orchestrator = Orchestrator::new(
            MapDownloader::with("other", vec![1u8]),
            stub(),
            MetadataReader::default(),
        );
        let reply = orchestrator
            .handle(&InboundFile::new("broken-transport", "a.png"))
            .await;
        assert_eq!(reply, Reply::TaggingFailed);
    }

    #[tokio::test]
    async fn inference_failure_yields_no_partial_report() -> Result<()> {
        let blob = png_with_text(&[("parameters", "castle, Steps: 20")])?;
        let orchestrator = Orchestrator::new(
            MapDownloader::with("file-4", blob.shared()),
            FailingTagger,
            MetadataReader::default(),
        );
        let reply = orchestrator.handle(&InboundFile::new("file-4", "castle.png")).await;
        assert_eq!(reply, Reply::TaggingFailed);
        assert_eq!(reply.render(), "Tagging failed, please try again later");
        assert!(orchestrator.tag_blob(&blob).await.is_err());
        Ok(())
    }
}
