//! Per-section userdata assembly.
//!
//! Each server section moves through
//! `Resolving → Embedding → Rendering → SizeChecking` and ends either
//! emitted (handed to a [`DocumentSink`]) or skipped with a reason. A skipped
//! section never stops the run; the orchestrator moves on to the next one and
//! records the outcome in a [`RunSummary`].

use std::fmt;
use std::io::{self, Write};

use camino::Utf8PathBuf;
use serde::Serialize;
use thiserror::Error;

use crate::embed::{EmbedError, EmbedMode, FileEmbedder};
use crate::instances::{Instances, ServerSection};
use crate::overlay::OverlaySet;
use crate::render::{RenderError, TemplateRenderer};
use crate::summary::{RunSummary, SectionReport};
use crate::target_path::TargetPath;

/// Largest rendered document, in bytes, that may be emitted.
pub const MAX_DOCUMENT_BYTES: usize = 16_384;

/// Processing stages of a single section.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AssemblyStage {
    /// Resolving the section's variable mapping.
    Resolving,
    /// Embedding verbatim and template files.
    Embedding,
    /// Rendering the top-level userdata template.
    Rendering,
    /// Checking the rendered document against the size budget.
    SizeChecking,
}

impl fmt::Display for AssemblyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resolving => "resolving",
            Self::Embedding => "embedding",
            Self::Rendering => "rendering",
            Self::SizeChecking => "size-checking",
        })
    }
}

/// Why a section produced no document.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// A file exceeded the per-file ceiling.
    #[error("`{path}` is {size} bytes; files larger than {limit} bytes cannot be embedded")]
    OversizedFile {
        /// Local path of the offending file.
        path: Utf8PathBuf,
        /// Observed size in bytes.
        size: u64,
        /// Ceiling in bytes.
        limit: usize,
    },
    /// A template referenced a missing variable.
    #[error("template `{template}` references undefined variable `{name}`")]
    UndefinedVariable {
        /// Template that failed.
        template: Utf8PathBuf,
        /// Missing reference.
        name: String,
    },
    /// The rendered document exceeded the total budget.
    #[error("userdata is {size} bytes; the limit is {limit} bytes")]
    OversizedDocument {
        /// Rendered size in bytes.
        size: usize,
        /// Budget in bytes.
        limit: usize,
    },
    /// Two files synthesised the same embedding key.
    #[error("`{second}` and `{first}` both map to embedding key `{key}`")]
    KeyCollision {
        /// Colliding key.
        key: String,
        /// Target path embedded first.
        first: TargetPath,
        /// Target path that collided.
        second: TargetPath,
    },
    /// A template could not be loaded or evaluated.
    #[error("template `{template}` failed: {message}")]
    TemplateError {
        /// Template that failed.
        template: Utf8PathBuf,
        /// Engine error message.
        message: String,
    },
    /// A file or directory could not be read.
    #[error("failed to read `{path}`: {message}")]
    FileAccess {
        /// Path that failed.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// The sink refused the document.
    #[error("failed to emit userdata: {message}")]
    SinkFailed {
        /// Sink error message.
        message: String,
    },
}

impl From<RenderError> for SkipReason {
    fn from(value: RenderError) -> Self {
        match value {
            RenderError::UndefinedVariable { template, name } => {
                Self::UndefinedVariable { template, name }
            }
            RenderError::NotFound { template, message }
            | RenderError::Template { template, message } => {
                Self::TemplateError { template, message }
            }
        }
    }
}

impl From<EmbedError> for SkipReason {
    fn from(value: EmbedError) -> Self {
        match value {
            EmbedError::OversizedFile { path, size, limit } => {
                Self::OversizedFile { path, size, limit }
            }
            EmbedError::KeyCollision { key, first, second } => {
                Self::KeyCollision { key, first, second }
            }
            EmbedError::FileAccess { path, message } => Self::FileAccess { path, message },
            EmbedError::Render(render) => render.into(),
        }
    }
}

/// Userdata text for one server, within [`MAX_DOCUMENT_BYTES`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenderedDocument {
    server_name: String,
    text: String,
    embedded_files: usize,
}

impl RenderedDocument {
    /// Accepts `text` when it fits the budget.
    ///
    /// # Errors
    ///
    /// Returns [`SkipReason::OversizedDocument`] when `text` is longer than
    /// [`MAX_DOCUMENT_BYTES`]; the text is discarded.
    pub fn within_budget(
        server_name: impl Into<String>,
        text: String,
        embedded_files: usize,
    ) -> Result<Self, SkipReason> {
        if text.len() > MAX_DOCUMENT_BYTES {
            return Err(SkipReason::OversizedDocument {
                size: text.len(),
                limit: MAX_DOCUMENT_BYTES,
            });
        }
        Ok(Self {
            server_name: server_name.into(),
            text,
            embedded_files,
        })
    }

    /// Server the document was rendered for.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Rendered userdata.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of files embedded in the document.
    #[must_use]
    pub const fn embedded_files(&self) -> usize {
        self.embedded_files
    }
}

/// Final state of one section.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SectionOutcome {
    /// A document was produced.
    Emitted(RenderedDocument),
    /// No document was produced.
    Skipped(SkipReason),
}

/// Receives emitted documents, for example to create instances or print them.
pub trait DocumentSink {
    /// Error raised when a document cannot be accepted.
    type Error: std::error::Error;

    /// Hands `document` to the sink.
    ///
    /// # Errors
    ///
    /// Returns the sink's error when the document cannot be accepted.
    fn accept(&mut self, document: &RenderedDocument) -> Result<(), Self::Error>;
}

/// Writes each document to a stream, preceded by a header line naming the
/// server.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    /// Wraps `writer`.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl WriterSink<io::Stdout> {
    /// Sink writing to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> DocumentSink for WriterSink<W> {
    type Error = io::Error;

    fn accept(&mut self, document: &RenderedDocument) -> Result<(), Self::Error> {
        writeln!(self.writer, "==> {} <==", document.server_name())?;
        writeln!(self.writer, "{}", document.text())?;
        self.writer.flush()
    }
}

/// Collects documents in memory.
#[derive(Clone, Debug, Default)]
pub struct CollectingSink {
    documents: Vec<RenderedDocument>,
}

impl CollectingSink {
    /// Documents received so far, in emission order.
    #[must_use]
    pub fn documents(&self) -> &[RenderedDocument] {
        &self.documents
    }
}

impl DocumentSink for CollectingSink {
    type Error = std::convert::Infallible;

    fn accept(&mut self, document: &RenderedDocument) -> Result<(), Self::Error> {
        self.documents.push(document.clone());
        Ok(())
    }
}

/// Runs the per-section assembly state machine.
#[derive(Clone, Debug)]
pub struct AssemblyOrchestrator {
    renderer: TemplateRenderer,
}

impl AssemblyOrchestrator {
    /// Creates an orchestrator resolving templates and directories via
    /// `renderer`.
    #[must_use]
    pub const fn new(renderer: TemplateRenderer) -> Self {
        Self { renderer }
    }

    /// Assembles userdata for a single section.
    #[must_use]
    pub fn assemble_section(
        &self,
        section: &ServerSection,
        overlays: &OverlaySet,
    ) -> SectionOutcome {
        match self.try_assemble(section, overlays) {
            Ok(document) => SectionOutcome::Emitted(document),
            Err(reason) => SectionOutcome::Skipped(reason),
        }
    }

    fn try_assemble(
        &self,
        section: &ServerSection,
        overlays: &OverlaySet,
    ) -> Result<RenderedDocument, SkipReason> {
        let name = section.name.as_str();

        enter(name, AssemblyStage::Resolving);
        let mut mapping = overlays.resolve(name);

        enter(name, AssemblyStage::Embedding);
        let embedder = FileEmbedder::new(&self.renderer);
        embedder.embed_directories(
            &section.verbatim_files_dirs,
            EmbedMode::Verbatim,
            &mut mapping,
        )?;
        embedder.embed_directories(
            &section.template_files_dirs,
            EmbedMode::Template,
            &mut mapping,
        )?;

        enter(name, AssemblyStage::Rendering);
        let text = self
            .renderer
            .render(&section.userdata, &mapping, Some(name))?;

        enter(name, AssemblyStage::SizeChecking);
        RenderedDocument::within_budget(name, text, mapping.files().len())
    }

    /// Processes every section in declaration order, handing emitted
    /// documents to `sink`.
    pub fn run<S: DocumentSink>(&self, instances: &Instances, sink: &mut S) -> RunSummary {
        let mut summary = RunSummary::default();
        for section in &instances.sections {
            let outcome = match self.assemble_section(section, &instances.overlays) {
                SectionOutcome::Emitted(document) => match sink.accept(&document) {
                    Ok(()) => SectionOutcome::Emitted(document),
                    Err(err) => SectionOutcome::Skipped(SkipReason::SinkFailed {
                        message: err.to_string(),
                    }),
                },
                skipped @ SectionOutcome::Skipped(_) => skipped,
            };
            log_outcome(&section.name, &outcome);
            summary.record(SectionReport::new(&section.name, &outcome));
        }
        summary
    }
}

fn enter(section: &str, stage: AssemblyStage) {
    tracing::debug!(section, %stage, "entering stage");
}

fn log_outcome(section: &str, outcome: &SectionOutcome) {
    match outcome {
        SectionOutcome::Emitted(document) => tracing::info!(
            section,
            bytes = document.text().len(),
            files = document.embedded_files(),
            "userdata emitted"
        ),
        SectionOutcome::Skipped(reason) => {
            tracing::warn!(section, %reason, "section skipped");
        }
    }
}
