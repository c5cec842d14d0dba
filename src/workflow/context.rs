//! Shared workspace state for workflow steps.
use crate::cli::{CapabilityArgs, RootArg};
use crate::config::{load_config, CapabilitySpec, PipelineConfig};
use crate::executor::{AttemptLog, StageExecutor};
use crate::paths::WorkspacePaths;
use crate::pipeline::{DocumentIndex, IndexManifest, SharedContext};
use crate::reasoning::{build_capability, LM_COMMAND_ENV};
use crate::retrieval::{EvidenceRetriever, HttpIndex, LexicalIndex, SimilarityIndex};
use crate::schema::ContentUnit;
use crate::util::read_json;
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Resolve `--root`, falling back to `<data dir>/lgate`.
pub fn resolve_root(arg: &RootArg) -> Result<PathBuf> {
    if let Some(root) = &arg.root {
        return Ok(root.clone());
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("lgate"))
        .ok_or_else(|| anyhow!("no platform data dir; pass --root"))
}

/// Workspace paths plus the loaded (or default) config.
pub struct Workspace {
    pub paths: WorkspacePaths,
    pub config: PipelineConfig,
}

impl Workspace {
    pub fn open(arg: &RootArg) -> Result<Self> {
        let root = resolve_root(arg)?;
        if !root.is_dir() {
            return Err(anyhow!(
                "workspace {} does not exist (run `lgate init` first)",
                root.display()
            ));
        }
        let config = load_config(&root)?;
        Ok(Self {
            paths: WorkspacePaths::new(root),
            config,
        })
    }

    pub fn load_manifest_optional(&self, document_id: &str) -> Result<Option<IndexManifest>> {
        let path = self.paths.index_manifest_path(document_id);
        if !path.is_file() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    pub fn load_document(&self, document_id: &str) -> Result<DocumentIndex> {
        let manifest = self.load_manifest_optional(document_id)?.ok_or_else(|| {
            anyhow!("document {document_id} is not indexed (run `lgate index --doc {document_id}`)")
        })?;
        let units: Vec<ContentUnit> = read_json(&self.paths.units_path(document_id))
            .with_context(|| format!("load annotated units of {document_id}"))?;
        if units.len() != manifest.unit_count {
            return Err(anyhow!(
                "index of {document_id} is stale: manifest lists {} units, found {}",
                manifest.unit_count,
                units.len()
            ));
        }
        Ok(DocumentIndex { manifest, units })
    }

    /// Every indexed document id, sorted.
    pub fn indexed_documents(&self) -> Result<Vec<String>> {
        let dir = self.paths.documents_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
            let id = entry?.file_name().to_string_lossy().to_string();
            if self.paths.index_manifest_path(&id).is_file() {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn shared_context(&self) -> Result<SharedContext> {
        SharedContext::load(&self.paths)
    }

    /// Retriever for `document`, with a cross-document index when asked for.
    pub fn retriever(&self, document: &DocumentIndex, cross_doc: bool) -> Result<EvidenceRetriever> {
        let retrieval = &self.config.retrieval;
        let mut settings = retrieval.settings();
        settings.cross_document = settings.cross_document || cross_doc;

        if let Some(endpoint) = &retrieval.similarity_endpoint {
            let index: Arc<dyn SimilarityIndex> = Arc::new(HttpIndex::new(
                endpoint.clone(),
                Duration::from_secs(retrieval.similarity_timeout_secs),
            ));
            return Ok(EvidenceRetriever::new(index.clone(), Some(index), settings));
        }

        let local: Arc<dyn SimilarityIndex> = Arc::new(LexicalIndex::build(&document.units));
        let global: Option<Arc<dyn SimilarityIndex>> = if settings.cross_document {
            let mut all = Vec::new();
            for id in self.indexed_documents()? {
                if id == document.manifest.document_id {
                    all.extend(document.units.iter().cloned());
                } else {
                    all.extend(self.load_document(&id)?.units);
                }
            }
            Some(Arc::new(LexicalIndex::build(&all)))
        } else {
            None
        };
        Ok(EvidenceRetriever::new(local, global, settings))
    }

    /// Primary capability: `--lm`/`--replay`, then config, then `$LGATE_LM_COMMAND`.
    pub fn primary_spec(&self, args: &CapabilityArgs) -> Result<CapabilitySpec> {
        if let Some(command) = &args.lm {
            return Ok(CapabilitySpec::Command {
                command: command.clone(),
            });
        }
        if let Some(dir) = &args.replay {
            return Ok(CapabilitySpec::Replay { dir: dir.clone() });
        }
        if let Some(spec) = &self.config.capabilities.primary {
            return Ok(spec.clone());
        }
        match std::env::var(LM_COMMAND_ENV) {
            Ok(command) if !command.trim().is_empty() => Ok(CapabilitySpec::Command { command }),
            _ => Err(anyhow!(
                "no reasoning capability configured (pass --lm or --replay, set capabilities.primary, or set {LM_COMMAND_ENV})"
            )),
        }
    }

    pub fn executor(&self, args: &CapabilityArgs) -> Result<StageExecutor> {
        let primary = build_capability(&self.primary_spec(args)?)?;
        let fallback = self
            .config
            .capabilities
            .fallback
            .as_ref()
            .map(build_capability)
            .transpose()?;
        Ok(StageExecutor::new(
            primary,
            fallback,
            self.config.retry.policy(),
            AttemptLog::new(self.paths.clone(), self.config.capture_attempt_content),
        ))
    }
}
