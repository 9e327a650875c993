//! Attachment ingestion: public-URL grant/revoke, MIME-family dispatch,
//! and document-index registration.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;

use sparrow_ai::{ChatRequest, LlmClient, Message};
use sparrow_core::current_unix_timestamp_ms;
use sparrow_index::DocumentIndex;
use sparrow_store::{CreateThreadOutcome, SparrowStore, ThreadHandles, ThreadRecord, ThreadUpdate};
use sparrow_voice::{SttProvider, SttRequest};

use super::slack_api_client::{SlackApiClient, SlackFileInfo};
use super::SlackEventFile;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "gif"];
const AUDIO_EXTENSIONS: [&str; 5] = ["webm", "mp4", "mp3", "wav", "m4a"];
const DOCUMENT_EXTENSIONS: [&str; 20] = [
    "txt", "md", "markdown", "pdf", "doc", "docx", "csv", "json", "html", "rtf", "log", "py",
    "js", "ts", "rs", "java", "c", "cpp", "go", "rb",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// MIME family buckets the pipeline dispatches on.
pub enum FileKind {
    Image,
    Audio,
    Document,
    Unsupported,
}

pub(super) fn classify_extension(filetype: &str) -> FileKind {
    let normalized = filetype.trim().to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&normalized.as_str()) {
        FileKind::Image
    } else if AUDIO_EXTENSIONS.contains(&normalized.as_str()) {
        FileKind::Audio
    } else if DOCUMENT_EXTENSIONS.contains(&normalized.as_str()) {
        FileKind::Document
    } else {
        FileKind::Unsupported
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Transient description of one processed attachment.
pub struct FileArtifact {
    pub file_id: String,
    pub upload_type: &'static str,
    pub content: String,
}

#[derive(Debug, Default)]
/// Batch output: inline artifacts plus flags that change the dispatch path.
pub struct FilePipelineOutput {
    pub artifacts: Vec<FileArtifact>,
    pub speech_mode: bool,
    pub indexed: bool,
}

pub(super) struct FilePipeline<'a> {
    pub(super) slack_client: &'a SlackApiClient,
    pub(super) vision_client: &'a Arc<dyn LlmClient>,
    pub(super) vision_model: &'a str,
    pub(super) stt: &'a Arc<dyn SttProvider>,
    pub(super) index: &'a Arc<dyn DocumentIndex>,
    pub(super) store: &'a Arc<SparrowStore>,
}

impl FilePipeline<'_> {
    /// Processes a message's attachments in upload order.
    ///
    /// One file failing (or being unsupported) never fails the batch, and
    /// the public-URL grant is revoked exactly once per shared file whether
    /// or not content processing succeeded.
    pub(super) async fn process_files(
        &self,
        channel_id: &str,
        anchor_ts: &str,
        user_text: &str,
        files: &[SlackEventFile],
    ) -> FilePipelineOutput {
        let mut output = FilePipelineOutput::default();

        for file in files {
            let info = match self.slack_client.file_info(&file.id).await {
                Ok(info) => info,
                Err(error) => {
                    tracing::warn!(file_id = %file.id, %error, "files.info failed; skipping file");
                    continue;
                }
            };
            let filetype = info.filetype.clone().unwrap_or_default();
            let kind = classify_extension(&filetype);
            if kind == FileKind::Unsupported {
                tracing::warn!(file_id = %file.id, %filetype, "unsupported file type; dropping");
                continue;
            }

            if let Err(error) = self.slack_client.share_public_url(&file.id).await {
                tracing::warn!(file_id = %file.id, %error, "public URL grant failed");
            }

            let processed = self
                .process_file_content(channel_id, anchor_ts, user_text, &info, kind)
                .await;

            // Revoke runs on success and failure alike; a leaked grant leaves
            // the file publicly reachable indefinitely.
            if let Err(error) = self.slack_client.revoke_public_url(&file.id).await {
                tracing::warn!(file_id = %file.id, %error, "public URL revoke failed");
            }

            match processed {
                Ok(ProcessedFile::Artifact(artifact)) => {
                    output.speech_mode |= artifact.upload_type == "audio";
                    output.artifacts.push(artifact);
                }
                Ok(ProcessedFile::Indexed) => {
                    output.indexed = true;
                }
                Err(error) => {
                    tracing::error!(file_id = %file.id, %error, "attachment processing failed");
                }
            }
        }

        output
    }

    async fn process_file_content(
        &self,
        channel_id: &str,
        anchor_ts: &str,
        user_text: &str,
        info: &SlackFileInfo,
        kind: FileKind,
    ) -> Result<ProcessedFile> {
        let url = construct_file_url(info)?;
        match kind {
            FileKind::Image => {
                let bytes = self.slack_client.download_file(&url).await?;
                let mime_type = info
                    .mimetype
                    .clone()
                    .unwrap_or_else(|| "image/png".to_string());
                let description = self
                    .describe_image(&bytes, &mime_type, user_text)
                    .await?;
                Ok(ProcessedFile::Artifact(FileArtifact {
                    file_id: info.id.clone(),
                    upload_type: "image",
                    content: description,
                }))
            }
            FileKind::Audio => {
                let bytes = self.slack_client.download_file(&url).await?;
                let mut request = SttRequest::new(bytes, file_name(info));
                if let Some(mimetype) = info.mimetype.clone() {
                    request.mime_type = mimetype;
                }
                let transcription = self
                    .stt
                    .transcribe(request)
                    .await
                    .map_err(|error| anyhow!("transcription failed: {error}"))?;
                Ok(ProcessedFile::Artifact(FileArtifact {
                    file_id: info.id.clone(),
                    upload_type: "audio",
                    content: transcription.transcript,
                }))
            }
            FileKind::Document => {
                let bytes = self.slack_client.download_file(&url).await?;
                self.register_document(channel_id, anchor_ts, info, bytes)
                    .await?;
                Ok(ProcessedFile::Indexed)
            }
            FileKind::Unsupported => Err(anyhow!("unsupported file reached processing")),
        }
    }

    async fn describe_image(
        &self,
        bytes: &[u8],
        mime_type: &str,
        user_text: &str,
    ) -> Result<String> {
        let prompt = if user_text.trim().is_empty() {
            "Describe this image in as much detail as possible. Extract as much information \
             as possible from the image."
                .to_string()
        } else {
            format!(
                "The user's request is: {user_text}\nDescribe this image in as much detail as \
                 possible as it relates to the user's request, to be used in your response."
            )
        };

        let request = ChatRequest::new(
            self.vision_model,
            vec![Message::user_with_image(
                prompt,
                mime_type,
                BASE64_STANDARD.encode(bytes),
            )],
        );
        let response = self
            .vision_client
            .complete(request)
            .await
            .context("vision description call failed")?;
        let description = response.message.text_content();
        if description.trim().is_empty() {
            anyhow::bail!("vision description came back empty");
        }
        Ok(description)
    }

    /// Registers document bytes with the thread's index, creating the thread
    /// record and external handles on first use.
    async fn register_document(
        &self,
        channel_id: &str,
        anchor_ts: &str,
        info: &SlackFileInfo,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let record = self.ensure_indexed_thread(channel_id, anchor_ts).await?;
        let index_handle = record
            .index_handle
            .clone()
            .ok_or_else(|| anyhow!("thread record is missing its index handle"))?;

        let file_id = self
            .index
            .upload_document(&file_name(info), bytes)
            .await
            .context("document upload failed")?;
        self.index
            .attach_document(&index_handle, &file_id)
            .await
            .context("document attach failed")?;
        let file_count = self.store.increment_thread_files(record.id)?;
        tracing::info!(
            channel_id,
            anchor_ts,
            file_count,
            "registered document with thread index"
        );
        Ok(())
    }

    async fn ensure_indexed_thread(
        &self,
        channel_id: &str,
        anchor_ts: &str,
    ) -> Result<ThreadRecord> {
        if let Some(record) = self.store.find_thread(channel_id, anchor_ts)? {
            if record.index_handle.is_some() {
                return Ok(record);
            }
            let index_handle = self
                .index
                .create_index(&format!("sparrow-{channel_id}-{anchor_ts}"))
                .await?;
            if let Some(conversation_handle) = record.conversation_handle.as_deref() {
                self.index
                    .attach_index(conversation_handle, &index_handle)
                    .await?;
            }
            self.store.update_thread(
                record.id,
                ThreadUpdate {
                    conversation_handle: None,
                    index_handle: Some(index_handle.clone()),
                },
            )?;
            return Ok(ThreadRecord {
                index_handle: Some(index_handle),
                ..record
            });
        }

        let conversation_handle = self.index.create_conversation().await?;
        let index_handle = self
            .index
            .create_index(&format!("sparrow-{channel_id}-{anchor_ts}"))
            .await?;
        self.index
            .attach_index(&conversation_handle, &index_handle)
            .await?;

        let outcome = self.store.create_thread(
            channel_id,
            anchor_ts,
            ThreadHandles {
                conversation_handle: Some(conversation_handle),
                index_handle: Some(index_handle),
            },
            current_unix_timestamp_ms(),
        )?;
        match outcome {
            CreateThreadOutcome::Created(record) => Ok(record),
            CreateThreadOutcome::Existing { record, orphaned } => {
                // A duplicate delivery raced us; the freshly allocated
                // handles now have no owner and are left for offline GC.
                tracing::warn!(
                    channel_id,
                    anchor_ts,
                    ?orphaned,
                    "concurrent thread creation lost; handles orphaned"
                );
                if record.index_handle.is_some() {
                    Ok(record)
                } else {
                    // The winner raced in without an index; attach one.
                    Box::pin(self.ensure_indexed_thread(channel_id, anchor_ts)).await
                }
            }
        }
    }
}

enum ProcessedFile {
    Artifact(FileArtifact),
    Indexed,
}

fn file_name(info: &SlackFileInfo) -> String {
    info.name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| {
            format!(
                "{}.{}",
                info.id,
                info.filetype.as_deref().unwrap_or("bin")
            )
        })
}

/// The public permalink's trailing secret unlocks the private download URL.
fn construct_file_url(info: &SlackFileInfo) -> Result<String> {
    let url_private = info
        .url_private
        .as_deref()
        .ok_or_else(|| anyhow!("file info missing url_private"))?;
    let permalink_public = info
        .permalink_public
        .as_deref()
        .ok_or_else(|| anyhow!("file info missing permalink_public"))?;
    let pub_secret = permalink_public
        .rsplit('-')
        .next()
        .ok_or_else(|| anyhow!("file permalink carries no secret"))?;
    Ok(format!("{url_private}?pub_secret={pub_secret}"))
}

#[cfg(test)]
mod tests {
    use super::{classify_extension, construct_file_url, FileKind};
    use crate::slack_runtime::slack_api_client::SlackFileInfo;

    #[test]
    fn unit_extension_classification_covers_all_families() {
        assert_eq!(classify_extension("png"), FileKind::Image);
        assert_eq!(classify_extension("JPEG"), FileKind::Image);
        assert_eq!(classify_extension("m4a"), FileKind::Audio);
        assert_eq!(classify_extension("webm"), FileKind::Audio);
        assert_eq!(classify_extension("pdf"), FileKind::Document);
        assert_eq!(classify_extension("md"), FileKind::Document);
        assert_eq!(classify_extension("exe"), FileKind::Unsupported);
        assert_eq!(classify_extension(""), FileKind::Unsupported);
    }

    #[test]
    fn unit_public_file_url_combines_private_url_and_secret() {
        let info = SlackFileInfo {
            id: "F1".to_string(),
            name: Some("notes.md".to_string()),
            filetype: Some("md".to_string()),
            mimetype: Some("text/markdown".to_string()),
            url_private: Some("https://files.slack.com/files-pri/T1-F1/notes.md".to_string()),
            permalink_public: Some("https://slack-files.com/T1-F1-abc123".to_string()),
        };
        assert_eq!(
            construct_file_url(&info).expect("url"),
            "https://files.slack.com/files-pri/T1-F1/notes.md?pub_secret=abc123"
        );
    }

    #[test]
    fn regression_missing_permalink_is_an_error_not_a_panic() {
        let info = SlackFileInfo {
            id: "F1".to_string(),
            name: None,
            filetype: None,
            mimetype: None,
            url_private: Some("https://files.slack.com/x".to_string()),
            permalink_public: None,
        };
        assert!(construct_file_url(&info).is_err());
    }
}
