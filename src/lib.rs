//! Core library for the userdata-forge assembly engine.
//!
//! The crate turns an instances file into one cloud-init userdata document
//! per server section: variables are resolved from the section's overlay,
//! file directories are embedded (verbatim or rendered, gzip-compressed when
//! that helps, base64-encoded), and the section's userdata template is
//! rendered with the accumulated mapping. Sections that break a size or
//! template rule are skipped and reported without affecting the others.

pub mod assemble;
pub mod config;
pub mod embed;
pub mod instances;
pub mod overlay;
pub mod render;
pub mod summary;
pub mod target_path;
pub mod value;

pub use assemble::{
    AssemblyOrchestrator, AssemblyStage, CollectingSink, DocumentSink, MAX_DOCUMENT_BYTES,
    RenderedDocument, SectionOutcome, SkipReason, WriterSink,
};
pub use config::{ConfigError, DEFAULT_INSTANCES_FILE, ForgeConfig};
pub use embed::{
    EmbedError, EmbedMode, EmbeddedFile, EmbeddedFiles, EncodedContent, Encoding, FileEmbedder,
    MAX_FILE_BYTES,
};
pub use instances::{Instances, InstancesError, ServerSection};
pub use overlay::{OverlaySet, VariableMapping, VariableOverlay, resolve_overlay};
pub use render::{RenderError, TemplateRenderer};
pub use summary::{RunSummary, SectionReport, SectionStatus};
pub use target_path::TargetPath;
pub use value::{MAX_VALUE_DEPTH, Scalar, Value, ValueError};
